mod zip;

use std::{
    collections::HashMap,
    io::{self, SeekFrom},
    ops::Range,
    path::PathBuf,
    sync::Arc,
};

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_stream::StreamExt;
use tokio_util::io::StreamReader;

pub use zip::ZipArchive;

/// Everything a boxed stream reader needs to be.
pub trait DynRead: tokio::io::AsyncRead + Send + Unpin {}
impl<T: tokio::io::AsyncRead + Send + Unpin> DynRead for T {}

/// Byte-level progress callback: (bytes so far, total if known). Fires at
/// least once per source and after every pull.
pub type Progress = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("I/O error on read source")]
    Io(#[from] io::Error),
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {0} fetching {1}")]
    HttpStatus(u16, String),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Range reads are not supported on this source")]
    NotSeekable,
    #[error("Not a zip archive")]
    ZipBadMagic,
    #[error("Zip64 archives are not supported")]
    Zip64Unsupported,
    #[error("Unsupported zip compression method {0}")]
    ZipMethod(u16),
    #[error("Corrupt zip entry '{0}'")]
    ZipCorruptEntry(String),
}

const DEFAULT_READ_ALL_CAPACITY: usize = 64 * 1024;

/// A pull-based byte producer scoped to one byte range of a source.
///
/// `pull` returning 0 signals EOF. `close` is idempotent; pulls after close
/// read as EOF.
pub struct ReadStream {
    inner: Option<Box<dyn DynRead>>,
    bytes_read: u64,
    expected_size: Option<u64>,
    progress: Option<Progress>,
}

impl ReadStream {
    pub fn new(inner: Box<dyn DynRead>, expected_size: Option<u64>) -> Self {
        Self {
            inner: Some(inner),
            bytes_read: 0,
            expected_size,
            progress: None,
        }
    }

    /// Attach a progress callback. Fires the initial 0-tick immediately.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        progress(0, self.expected_size);
        self.progress = Some(progress);
        self
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn expected_size(&self) -> Option<u64> {
        self.expected_size
    }

    pub async fn pull(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(0);
        };
        let n = inner.read(dst).await?;
        self.bytes_read += n as u64;
        if let Some(progress) = &self.progress {
            progress(self.bytes_read, self.expected_size);
        }
        Ok(n)
    }

    /// Reads to EOF into a growing buffer (doubling; initial capacity from
    /// the size hint, else 64 KiB) and returns the exact-length bytes.
    pub async fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let initial = self
            .expected_size
            .map_or(DEFAULT_READ_ALL_CAPACITY, |s| s as usize)
            .max(1);
        let mut buf = vec![0u8; initial];
        let mut len = 0;
        loop {
            if len == buf.len() {
                buf.resize(buf.len() * 2, 0);
            }
            let n = self.pull(&mut buf[len..]).await?;
            if n == 0 {
                break;
            }
            len += n;
        }
        buf.truncate(len);
        Ok(buf)
    }

    pub fn close(&mut self) {
        self.inner = None;
    }
}

/// Serves small reads from an amortized chunk pulled off the inner stream.
pub struct BufferedStream {
    inner: ReadStream,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    chunk_size: usize,
}

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

impl BufferedStream {
    pub fn new(inner: ReadStream) -> Self {
        Self::with_chunk_size(inner, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(inner: ReadStream, chunk_size: usize) -> Self {
        Self {
            inner,
            buf: vec![0; chunk_size],
            start: 0,
            end: 0,
            chunk_size,
        }
    }

    async fn refill(&mut self) -> io::Result<usize> {
        self.start = 0;
        self.end = 0;
        while self.end < self.chunk_size {
            let n = self.inner.pull(&mut self.buf[self.end..]).await?;
            if n == 0 {
                break;
            }
            self.end += n;
        }
        Ok(self.end)
    }

    pub async fn pull(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if self.start == self.end && self.refill().await? == 0 {
            return Ok(0);
        }
        let n = dst.len().min(self.end - self.start);
        dst[..n].copy_from_slice(&self.buf[self.start..self.start + n]);
        self.start += n;
        Ok(n)
    }

    pub async fn read_exact(&mut self, dst: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < dst.len() {
            let n = self.pull(&mut dst[filled..]).await?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            filled += n;
        }
        Ok(())
    }

    pub async fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if self.start == self.end && self.refill().await? == 0 {
            return Ok(None);
        }
        let b = self.buf[self.start];
        self.start += 1;
        Ok(Some(b))
    }
}

/// Tail of a shared memory buffer, readable through `std::io::Cursor`.
struct ArcSlice {
    bytes: Arc<[u8]>,
    range: Range<usize>,
}

impl AsRef<[u8]> for ArcSlice {
    fn as_ref(&self) -> &[u8] {
        &self.bytes[self.range.clone()]
    }
}

/// An addressable resource that hands out range-scoped streams.
#[derive(Clone)]
pub enum ReadSource {
    Memory {
        name: String,
        bytes: Arc<[u8]>,
    },
    File {
        path: PathBuf,
        size: u64,
    },
    /// Only constructed when the server answered the Range probe; always
    /// seekable.
    Url {
        client: reqwest::Client,
        url: String,
        size: u64,
    },
}

impl ReadSource {
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Memory {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> Option<u64> {
        match self {
            Self::Memory { bytes, .. } => Some(bytes.len() as u64),
            Self::File { size, .. } | Self::Url { size, .. } => Some(*size),
        }
    }

    pub fn seekable(&self) -> bool {
        match self {
            Self::Memory { .. } | Self::File { .. } | Self::Url { .. } => true,
        }
    }

    /// Opens a stream over `[start, end)`, clamped to the source size. `None`
    /// reads the whole source and is the only legal call on a non-seekable
    /// source.
    pub async fn read(&self, range: Option<Range<u64>>) -> Result<ReadStream, VfsError> {
        if range.is_some() && !self.seekable() {
            return Err(VfsError::NotSeekable);
        }
        let size = self.size();
        let range = match (range, size) {
            (Some(r), Some(size)) => r.start.min(size)..r.end.min(size).max(r.start.min(size)),
            (Some(r), None) => r,
            (None, Some(size)) => 0..size,
            (None, None) => 0..u64::MAX,
        };

        match self {
            Self::Memory { bytes, .. } => {
                let slice = ArcSlice {
                    bytes: bytes.clone(),
                    range: range.start as usize..range.end as usize,
                };
                Ok(ReadStream::new(
                    Box::new(std::io::Cursor::new(slice)),
                    Some(range.end - range.start),
                ))
            }
            Self::File { path, .. } => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(range.start)).await?;
                let len = range.end - range.start;
                Ok(ReadStream::new(Box::new(file.take(len)), Some(len)))
            }
            Self::Url { client, url, .. } => {
                // HTTP ranges use an inclusive end byte.
                let request = client.get(url).header(
                    reqwest::header::RANGE,
                    format!("bytes={}-{}", range.start, range.end.saturating_sub(1)),
                );
                let response = request.send().await?;
                if !response.status().is_success() {
                    return Err(VfsError::HttpStatus(response.status().as_u16(), url.clone()));
                }
                let stream = response
                    .bytes_stream()
                    .map(|b| b.map_err(|e| io::Error::new(io::ErrorKind::ConnectionAborted, e)));
                Ok(ReadStream::new(
                    Box::new(StreamReader::new(stream)),
                    Some(range.end - range.start),
                ))
            }
        }
    }
}

/// Factory for [`ReadSource`]s by name.
pub enum ReadFileSystem {
    Memory {
        files: HashMap<String, Arc<[u8]>>,
    },
    Local,
    Url {
        client: reqwest::Client,
    },
    Zip {
        archive: ZipArchive,
    },
}

impl ReadFileSystem {
    pub fn memory() -> Self {
        Self::Memory {
            files: HashMap::new(),
        }
    }

    pub fn local() -> Self {
        Self::Local
    }

    pub fn url() -> Self {
        Self::Url {
            client: reqwest::Client::new(),
        }
    }

    pub async fn zip(source: ReadSource) -> Result<Self, VfsError> {
        Ok(Self::Zip {
            archive: ZipArchive::open(source).await?,
        })
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        match self {
            Self::Memory { files } => {
                files.insert(name.into(), bytes.into());
            }
            _ => panic!("Only memory filesystems accept inserts"),
        }
    }

    pub fn file_names(&self) -> Vec<String> {
        match self {
            Self::Memory { files } => files.keys().cloned().collect(),
            Self::Zip { archive } => archive.entry_names().map(str::to_owned).collect(),
            Self::Local | Self::Url { .. } => vec![],
        }
    }

    pub async fn create_source(
        &self,
        name: &str,
        progress: Option<Progress>,
    ) -> Result<ReadSource, VfsError> {
        match self {
            Self::Memory { files } => {
                let bytes = files
                    .get(name)
                    .ok_or_else(|| VfsError::NotFound(name.to_owned()))?
                    .clone();
                if let Some(progress) = progress {
                    progress(bytes.len() as u64, Some(bytes.len() as u64));
                }
                Ok(ReadSource::Memory {
                    name: name.to_owned(),
                    bytes,
                })
            }
            Self::Local => {
                let path = PathBuf::from(name);
                let meta = tokio::fs::metadata(&path)
                    .await
                    .map_err(|_| VfsError::NotFound(name.to_owned()))?;
                if let Some(progress) = progress {
                    progress(0, Some(meta.len()));
                }
                Ok(ReadSource::File {
                    path,
                    size: meta.len(),
                })
            }
            Self::Url { client } => create_url_source(client, name, progress).await,
            Self::Zip { archive } => {
                let bytes = archive.read_entry(name).await?;
                let len = bytes.len() as u64;
                if let Some(progress) = progress {
                    progress(len, Some(len));
                }
                Ok(ReadSource::from_bytes(name, bytes))
            }
        }
    }
}

/// Probe Range support with a one-byte request. Servers that answer 206 get
/// ranged streaming; anything else is downloaded once into memory.
async fn create_url_source(
    client: &reqwest::Client,
    url: &str,
    progress: Option<Progress>,
) -> Result<ReadSource, VfsError> {
    let probe = client
        .get(url)
        .header(reqwest::header::RANGE, "bytes=0-0")
        .send()
        .await?;

    if probe.status() == reqwest::StatusCode::PARTIAL_CONTENT {
        // Total size comes from "Content-Range: bytes 0-0/<size>".
        let size = probe
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit('/').next())
            .and_then(|v| v.parse::<u64>().ok());
        if let Some(size) = size {
            log::debug!("Server supports range requests for {url} ({size} bytes)");
            if let Some(progress) = progress {
                progress(0, Some(size));
            }
            return Ok(ReadSource::Url {
                client: client.clone(),
                url: url.to_owned(),
                size,
            });
        }
    }

    log::debug!("No range support for {url}, downloading fully");
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(VfsError::HttpStatus(
            response.status().as_u16(),
            url.to_owned(),
        ));
    }
    let expected = response.content_length();
    let stream = response
        .bytes_stream()
        .map(|b| b.map_err(|e| io::Error::new(io::ErrorKind::ConnectionAborted, e)));
    let mut stream = ReadStream::new(Box::new(StreamReader::new(stream)), expected);
    if let Some(progress) = progress {
        stream = stream.with_progress(progress);
    }
    let bytes = stream.read_all().await?;
    Ok(ReadSource::from_bytes(url, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn memory_source_ranges_clamp() {
        let source = ReadSource::from_bytes("mem", b"hello world".to_vec());
        assert_eq!(source.size(), Some(11));
        assert!(source.seekable());

        let mut stream = source.read(Some(6..100)).await.unwrap();
        assert_eq!(stream.read_all().await.unwrap(), b"world");

        let mut stream = source.read(None).await.unwrap();
        assert_eq!(stream.read_all().await.unwrap(), b"hello world");
        assert_eq!(stream.bytes_read(), 11);
    }

    #[tokio::test]
    async fn read_all_grows_past_bad_hint() {
        let bytes: Vec<u8> = (0..200_000u32).map(|i| i as u8).collect();
        // Lie about the expected size; read_all must still return everything.
        let mut stream = ReadStream::new(
            Box::new(std::io::Cursor::new(bytes.clone())),
            Some(10),
        );
        assert_eq!(stream.read_all().await.unwrap(), bytes);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let source = ReadSource::from_bytes("mem", b"abc".to_vec());
        let mut stream = source.read(None).await.unwrap();
        stream.close();
        stream.close();
        let mut buf = [0u8; 4];
        assert_eq!(stream.pull(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn progress_fires_on_each_pull() {
        let ticks = Arc::new(AtomicU64::new(0));
        let ticks_cb = ticks.clone();
        let source = ReadSource::from_bytes("mem", vec![0u8; 100]);
        let mut stream = source
            .read(None)
            .await
            .unwrap()
            .with_progress(Arc::new(move |_done, _total| {
                ticks_cb.fetch_add(1, Ordering::Relaxed);
            }));
        let mut buf = [0u8; 32];
        while stream.pull(&mut buf).await.unwrap() > 0 {}
        // Initial tick + one per pull (including the EOF pull).
        assert!(ticks.load(Ordering::Relaxed) >= 2);
    }

    #[tokio::test]
    async fn buffered_stream_serves_bytes() {
        let source = ReadSource::from_bytes("mem", (0..=255u8).collect::<Vec<_>>());
        let stream = source.read(None).await.unwrap();
        let mut buffered = BufferedStream::with_chunk_size(stream, 16);

        assert_eq!(buffered.read_byte().await.unwrap(), Some(0));
        let mut buf = [0u8; 3];
        buffered.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3]);

        let mut rest = vec![];
        let mut chunk = [0u8; 40];
        loop {
            let n = buffered.pull(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            rest.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(rest.len(), 252);
        assert_eq!(rest[0], 4);
        assert_eq!(*rest.last().unwrap(), 255);
    }
}
