use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Commit;

/// Frame overhead around each payload: u32 length prefix plus u32 crc.
const FRAME_OVERHEAD: u64 = 8;

/// Encode a single commit as one `[len][bincode][crc32]` frame.
fn encode_commit(writer: &mut impl Write, commit: &Commit) -> io::Result<()> {
    let payload =
        bincode::serialize(commit).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "commit too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes, or report a clean/torn end with `Ok(false)`.
fn read_frame_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Every intact commit from the start of the file, and the byte length they cover.
fn read_commits(path: &Path) -> io::Result<(Vec<Commit>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut commits = Vec::new();
    let mut valid_len = 0u64;

    loop {
        let mut len_buf = [0u8; 4];
        if !read_frame_part(&mut reader, &mut len_buf)? {
            break;
        }
        let len = u32::from_le_bytes(len_buf);
        let mut payload = vec![0u8; len as usize];
        let mut crc_buf = [0u8; 4];
        if !read_frame_part(&mut reader, &mut payload)? || !read_frame_part(&mut reader, &mut crc_buf)? {
            warn!("wal: torn frame after {} commits", commits.len());
            break;
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            warn!("wal: crc mismatch after {} commits", commits.len());
            break;
        }
        match bincode::deserialize::<Commit>(&payload) {
            Ok(commit) => commits.push(commit),
            Err(e) => {
                warn!("wal: undecodable commit after {}: {e}", commits.len());
                break;
            }
        }
        valid_len += FRAME_OVERHEAD + len as u64;
    }

    Ok((commits, valid_len))
}

/// Append-only log of commits, one frame per commit.
///
/// Frames are staged in memory and written with a single fsync per batch.
/// The file never keeps bytes past the last durable frame: a torn tail found
/// at open is cut off, and a failed batch is truncated away, so every frame
/// appended later stays reachable on replay.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Length of the file up to the last fsynced frame.
    durable_len: u64,
    pending: Vec<u8>,
    pending_commits: u64,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL at `path`, returning the commits it holds.
    /// Trailing bytes that do not form a valid frame are truncated first.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Commit>)> {
        let (commits, valid_len) = read_commits(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > valid_len {
            warn!(
                "wal: truncating {} trailing bytes of {}",
                on_disk - valid_len,
                path.display()
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            file,
            path: path.to_path_buf(),
            durable_len: valid_len,
            pending: Vec::new(),
            pending_commits: 0,
            appends_since_compact: 0,
        };
        Ok((wal, commits))
    }

    /// Append a single commit and fsync. Production code goes through
    /// `append_buffered` + `flush_sync` for group commit.
    #[cfg(test)]
    pub fn append(&mut self, commit: &Commit) -> io::Result<()> {
        self.append_buffered(commit)?;
        self.flush_sync()
    }

    /// Stage a commit. Durable only after `flush_sync()`.
    pub fn append_buffered(&mut self, commit: &Commit) -> io::Result<()> {
        let mut frame = Vec::new();
        encode_commit(&mut frame, commit)?;
        self.pending.extend_from_slice(&frame);
        self.pending_commits += 1;
        Ok(())
    }

    /// Drop every staged commit without writing it.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
        self.pending_commits = 0;
    }

    /// Write the staged commits and fsync. On failure the file is cut back to
    /// its last durable length and nothing staged survives.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let written = self
            .file
            .write_all(&self.pending)
            .and_then(|()| self.file.sync_data());
        match written {
            Ok(()) => {
                self.durable_len += self.pending.len() as u64;
                self.appends_since_compact += self.pending_commits;
                self.discard_pending();
                Ok(())
            }
            Err(e) => {
                self.discard_pending();
                if let Err(te) = self
                    .file
                    .set_len(self.durable_len)
                    .and_then(|()| self.file.sync_all())
                {
                    warn!("wal: rollback to {} bytes failed: {te}", self.durable_len);
                }
                Err(e)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write compacted commits to a temp file and fsync.
    pub fn write_compact_file(path: &Path, commits: &[Commit]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path.with_extension("wal.tmp"))?);
        for commit in commits {
            encode_commit(&mut writer, commit)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Atomic swap: rename temp file over the WAL and reopen.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension("wal.tmp"), &self.path)?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.durable_len = self.file.metadata()?.len();
        self.discard_pending();
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, commits: &[Commit]) -> io::Result<()> {
        Self::write_compact_file(&self.path, commits)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    #[cfg(test)]
    pub fn durable_len(&self) -> u64 {
        self.durable_len
    }

    /// Read every intact commit without touching the file.
    pub fn replay(path: &Path) -> io::Result<Vec<Commit>> {
        read_commits(path).map(|(commits, _)| commits)
    }
}
