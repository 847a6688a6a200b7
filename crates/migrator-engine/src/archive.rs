//! Backup archive stream.
//!
//! An archive is a gzip stream of newline-delimited JSON. The first line is
//! a header carrying the backup object; every following line is one
//! [`ArchiveEntry`].

use std::io::{BufRead, BufReader, Lines, Read, Write};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::Backup;

pub const ARCHIVE_FORMAT: &str = "migrator-archive";
pub const ARCHIVE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ArchiveError {
	#[error("archive I/O")]
	Io(#[from] std::io::Error),

	#[error("malformed archive line {line}")]
	Malformed {
		line: usize,
		#[source]
		source: serde_json::Error,
	},

	#[error("archive is empty")]
	MissingHeader,

	#[error("unsupported archive format {format:?} version {version}")]
	UnsupportedFormat { format: String, version: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveHeader {
	pub format: String,
	pub version: u32,
	/// `gitVersion` of the cluster the backup was taken from.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cluster_version: Option<String>,
	pub backup: Backup,
}

/// One backed-up object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveEntry {
	/// Group-resource the object belongs to, e.g. `replicasets.apps`.
	pub resource: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub namespace: Option<String>,
	pub object: serde_json::Value,
}

impl ArchiveEntry {
	pub fn name(&self) -> &str {
		self.object
			.pointer("/metadata/name")
			.and_then(serde_json::Value::as_str)
			.unwrap_or_default()
	}
}

pub struct ArchiveWriter<W: Write> {
	encoder: GzEncoder<W>,
	entries: usize,
}

impl<W: Write> ArchiveWriter<W> {
	/// Start an archive by writing its header.
	pub fn new(writer: W, backup: &Backup, cluster_version: Option<String>) -> Result<Self, ArchiveError> {
		let mut archive = Self {
			encoder: GzEncoder::new(writer, Compression::default()),
			entries: 0,
		};
		let header = ArchiveHeader {
			format: ARCHIVE_FORMAT.to_string(),
			version: ARCHIVE_VERSION,
			cluster_version,
			backup: backup.clone(),
		};
		archive.write_line(&header)?;
		Ok(archive)
	}

	pub fn write_entry(&mut self, entry: &ArchiveEntry) -> Result<(), ArchiveError> {
		self.write_line(entry)?;
		self.entries += 1;
		Ok(())
	}

	pub fn entries(&self) -> usize {
		self.entries
	}

	/// Finish the gzip stream and flush the underlying writer.
	pub fn finish(self) -> Result<W, ArchiveError> {
		let mut inner = self.encoder.finish()?;
		inner.flush()?;
		Ok(inner)
	}

	fn write_line(&mut self, value: &impl Serialize) -> Result<(), ArchiveError> {
		serde_json::to_writer(&mut self.encoder, value).map_err(std::io::Error::from)?;
		self.encoder.write_all(b"\n")?;
		Ok(())
	}
}

#[derive(Debug)]
pub struct ArchiveReader<R: Read> {
	lines: Lines<BufReader<GzDecoder<R>>>,
	header: ArchiveHeader,
	line: usize,
}

impl<R: Read> ArchiveReader<R> {
	/// Open an archive and validate its header.
	pub fn open(reader: R) -> Result<Self, ArchiveError> {
		let mut lines = BufReader::new(GzDecoder::new(reader)).lines();
		let first = lines.next().ok_or(ArchiveError::MissingHeader)??;
		let header: ArchiveHeader =
			serde_json::from_str(&first).map_err(|source| ArchiveError::Malformed { line: 1, source })?;

		if header.format != ARCHIVE_FORMAT || header.version != ARCHIVE_VERSION {
			return Err(ArchiveError::UnsupportedFormat {
				format: header.format,
				version: header.version,
			});
		}

		Ok(Self {
			lines,
			header,
			line: 1,
		})
	}

	pub fn header(&self) -> &ArchiveHeader {
		&self.header
	}
}

impl<R: Read> Iterator for ArchiveReader<R> {
	type Item = Result<ArchiveEntry, ArchiveError>;

	fn next(&mut self) -> Option<Self::Item> {
		loop {
			let line = match self.lines.next()? {
				Ok(line) => line,
				Err(e) => return Some(Err(e.into())),
			};
			self.line += 1;
			if line.trim().is_empty() {
				continue;
			}
			let line_no = self.line;
			return Some(
				serde_json::from_str(&line).map_err(|source| ArchiveError::Malformed { line: line_no, source }),
			);
		}
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;

	fn backup() -> Backup {
		Backup::builder().namespace("migrator").name("backup").build()
	}

	#[test]
	fn test_reader_sees_what_writer_wrote() {
		let entry = ArchiveEntry {
			resource: "configmaps".to_string(),
			namespace: Some("default".to_string()),
			object: serde_json::json!({
				"apiVersion": "v1",
				"kind": "ConfigMap",
				"metadata": {"name": "settings", "namespace": "default"}
			}),
		};

		let mut writer = ArchiveWriter::new(Vec::new(), &backup(), Some("v1.31.0".to_string())).unwrap();
		writer.write_entry(&entry).unwrap();
		assert_eq!(writer.entries(), 1);
		let bytes = writer.finish().unwrap();

		let reader = ArchiveReader::open(bytes.as_slice()).unwrap();
		assert_eq!(reader.header().backup.name(), "backup");
		assert_eq!(reader.header().cluster_version.as_deref(), Some("v1.31.0"));

		let entries: Vec<_> = reader.collect::<Result<_, _>>().unwrap();
		assert_eq!(entries, vec![entry]);
		assert_eq!(entries[0].name(), "settings");
	}

	#[test]
	fn test_rejects_foreign_format() {
		let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
		encoder
			.write_all(br#"{"format":"tarball","version":1,"backup":{"apiVersion":"velero.io/v1","kind":"Backup","metadata":{},"spec":{}}}"#)
			.unwrap();
		let bytes = encoder.finish().unwrap();

		assert_matches!(
			ArchiveReader::open(bytes.as_slice()),
			Err(ArchiveError::UnsupportedFormat { format, version: 1 }) if format == "tarball"
		);
	}

	#[test]
	fn test_rejects_empty_archive() {
		let bytes = GzEncoder::new(Vec::new(), Compression::default()).finish().unwrap();

		assert_matches!(ArchiveReader::open(bytes.as_slice()), Err(ArchiveError::MissingHeader));
	}

	#[test]
	fn test_rejects_non_gzip_input() {
		assert_matches!(ArchiveReader::open(&b"plain text"[..]), Err(ArchiveError::Io(_)));
	}
}
