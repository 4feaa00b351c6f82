//! Container reader: opens WACZ packages or bare WARC files and streams captured entries.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::read::{DeflateDecoder, MultiGzDecoder};
use zip::{CompressionMethod, ZipArchive};

use crate::types::{CapturedEntry, WarcexError, WarcexResult};
use crate::warc::{entry_from_record, RecordError, WarcRecordReader};

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

type RecordStream = WarcRecordReader<Box<dyn BufRead>>;

/// Physical layout of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Zip package holding one or more WARC members.
    Wacz,
    /// A single `.warc` or `.warc.gz` stream.
    Warc,
}

enum Source {
    Wacz {
        archive: ZipArchive<File>,
        /// Central-directory index and name of each WARC member not yet read.
        members: VecDeque<(usize, String)>,
    },
    Warc,
}

/// Where a member's bytes sit inside the package.
struct MemberLayout {
    offset: u64,
    length: u64,
    compression: CompressionMethod,
}

/// Lazy, single-pass reader over the captured entries of one container.
///
/// The file handle is owned by the reader and released when it is dropped.
pub struct ArchiveReader {
    path: PathBuf,
    kind: ContainerKind,
    source: Source,
    current: Option<RecordStream>,
    current_member: String,
    next_sequence: u64,
    records_seen: u64,
}

impl ArchiveReader {
    /// Open a container and validate its structural index.
    pub fn open(path: &Path) -> WarcexResult<Self> {
        let mut file = File::open(path)
            .map_err(|e| WarcexError::archive(path, format!("cannot open: {e}")))?;

        let mut magic = [0u8; 4];
        let n = read_prefix(&mut file, &mut magic)
            .map_err(|e| WarcexError::archive(path, format!("cannot read: {e}")))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| WarcexError::archive(path, format!("cannot read: {e}")))?;

        let looks_zipped = has_extension(path, &["wacz", "zip"]);
        if n == 4 && magic == ZIP_MAGIC {
            Self::open_wacz(path, file)
        } else if looks_zipped {
            Err(WarcexError::archive(path, "not a zip package"))
        } else {
            Self::open_warc(path, file, n >= 2 && magic[..2] == GZIP_MAGIC)
        }
    }

    fn open_wacz(path: &Path, file: File) -> WarcexResult<Self> {
        let mut archive = ZipArchive::new(file)
            .map_err(|e| WarcexError::archive(path, format!("unreadable zip index: {e}")))?;

        let mut members = VecDeque::new();
        for index in 0..archive.len() {
            let member = archive
                .by_index_raw(index)
                .map_err(|e| WarcexError::archive(path, format!("unreadable zip entry: {e}")))?;
            let name = member.name().to_string();
            if is_warc_name(&name) {
                members.push_back((index, name));
            }
        }

        if members.is_empty() {
            return Err(WarcexError::archive(path, "package contains no WARC files"));
        }

        tracing::info!(
            "Opened WACZ package {} with {} WARC file(s)",
            path.display(),
            members.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            kind: ContainerKind::Wacz,
            source: Source::Wacz { archive, members },
            current: None,
            current_member: String::new(),
            next_sequence: 0,
            records_seen: 0,
        })
    }

    fn open_warc(path: &Path, file: File, gzipped: bool) -> WarcexResult<Self> {
        let mut reader: Box<dyn BufRead> = if gzipped {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        let head = reader
            .fill_buf()
            .map_err(|e| WarcexError::archive(path, format!("cannot read stream: {e}")))?;
        let start = head
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(head.len());
        if !head[start..].starts_with(b"WARC/") {
            return Err(WarcexError::archive(path, "not a WARC stream"));
        }

        tracing::info!("Opened WARC file {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            kind: ContainerKind::Warc,
            source: Source::Warc,
            current: Some(WarcRecordReader::new(reader)),
            current_member: path.display().to_string(),
            next_sequence: 0,
            records_seen: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// Number of WARC records read so far, including skipped ones.
    pub fn records_seen(&self) -> u64 {
        self.records_seen
    }

    /// Start streaming the next WARC member of a package. `Ok(false)` when none are left.
    ///
    /// The member is read through its own file handle positioned at the
    /// member's data, so it is never held in memory as a whole.
    fn open_next_member(&mut self) -> WarcexResult<bool> {
        let Source::Wacz { archive, members } = &mut self.source else {
            return Ok(false);
        };
        let Some((index, name)) = members.pop_front() else {
            return Ok(false);
        };
        self.current_member = name.clone();

        let reader = archive
            .by_index_raw(index)
            .map_err(|e| e.to_string())
            .and_then(|member| {
                if member.encrypted() {
                    return Err("encrypted members are not supported".to_string());
                }
                Ok(MemberLayout {
                    offset: member.data_start(),
                    length: member.compressed_size(),
                    compression: member.compression(),
                })
            })
            .and_then(|layout| {
                tracing::debug!(
                    "Reading WARC member {name} ({} bytes, {:?})",
                    layout.length,
                    layout.compression
                );
                open_member_stream(&self.path, &layout)
            })
            .map_err(|reason| WarcexError::RecordParse {
                record: self.records_seen,
                reason: format!("{name}: cannot read member: {reason}"),
            })?;

        self.current = Some(WarcRecordReader::new(reader));
        Ok(true)
    }
}

impl Iterator for ArchiveReader {
    type Item = WarcexResult<CapturedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                match self.open_next_member() {
                    Ok(true) => continue,
                    Ok(false) => return None,
                    Err(e) => return Some(Err(e)),
                }
            }
            let Some(stream) = self.current.as_mut() else {
                return None;
            };

            let record = match stream.next() {
                None => {
                    self.current = None;
                    continue;
                }
                Some(Err(RecordError::Io(e))) => {
                    self.current = None;
                    return Some(Err(WarcexError::RecordParse {
                        record: self.records_seen,
                        reason: format!("{}: stream failed: {e}", self.current_member),
                    }));
                }
                Some(Err(RecordError::Malformed(reason))) => {
                    self.records_seen += 1;
                    return Some(Err(WarcexError::RecordParse {
                        record: self.records_seen,
                        reason: format!("{}: {reason}", self.current_member),
                    }));
                }
                Some(Ok(record)) => record,
            };

            self.records_seen += 1;
            match entry_from_record(record, self.next_sequence) {
                Ok(Some(entry)) => {
                    self.next_sequence += 1;
                    return Some(Ok(entry));
                }
                Ok(None) => continue,
                Err(reason) => {
                    return Some(Err(WarcexError::RecordParse {
                        record: self.records_seen,
                        reason,
                    }));
                }
            }
        }
    }
}

/// Open a package member as a decompressed stream, unwrapping a gzipped WARC inside it.
fn open_member_stream(path: &Path, layout: &MemberLayout) -> Result<Box<dyn BufRead>, String> {
    let mut file = File::open(path).map_err(|e| e.to_string())?;
    file.seek(SeekFrom::Start(layout.offset))
        .map_err(|e| e.to_string())?;
    let raw = file.take(layout.length);

    let decoded: Box<dyn Read> = match layout.compression {
        CompressionMethod::Stored => Box::new(raw),
        CompressionMethod::Deflated => Box::new(DeflateDecoder::new(raw)),
        other => return Err(format!("unsupported compression method {other:?}")),
    };

    let mut reader = BufReader::new(decoded);
    let gzipped = reader
        .fill_buf()
        .map_err(|e| e.to_string())?
        .starts_with(&GZIP_MAGIC);
    if gzipped {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

fn read_prefix(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

fn is_warc_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".warc") || lower.ends_with(".warc.gz")
}
