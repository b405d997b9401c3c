//! Mixdown and stem audio
//!
//! Streams are lazy and forward-only: nothing is read until the body is
//! polled, and dropping the body closes the file. The byte count announced in
//! [`MediaStream::content_length`] is enforced; a file that ends early yields
//! [`Error::StreamingIo`] instead of a silently short transfer.

use super::write_atomic;
use crate::layout::StorageLayout;
use crate::track::{MediaSource, Stem, TrackId};
use crate::{Error, Result};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::fmt;
use std::fs::File;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Read size for streamed bodies
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Inclusive byte range within a media file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Parse a single-range `Range` header value against a file of `size` bytes
    ///
    /// Returns `Ok(None)` for headers that should be ignored (other units,
    /// multiple ranges, malformed syntax) and
    /// [`Error::RangeNotSatisfiable`] when the range starts past the end.
    pub fn parse(header: &str, size: u64) -> Result<Option<ByteRange>> {
        let Some(ranges) = header.trim().strip_prefix("bytes=") else {
            return Ok(None);
        };
        if ranges.contains(',') {
            return Ok(None);
        }
        let Some((first, last)) = ranges.trim().split_once('-') else {
            return Ok(None);
        };
        let (first, last) = (first.trim(), last.trim());

        let unsatisfiable = Error::RangeNotSatisfiable { size };

        if first.is_empty() {
            // Suffix range: last N bytes
            let Ok(suffix) = last.parse::<u64>() else {
                return Ok(None);
            };
            if suffix == 0 || size == 0 {
                return Err(unsatisfiable);
            }
            return Ok(Some(ByteRange {
                start: size.saturating_sub(suffix),
                end: size - 1,
            }));
        }

        let Ok(start) = first.parse::<u64>() else {
            return Ok(None);
        };
        let end = if last.is_empty() {
            size.saturating_sub(1)
        } else {
            match last.parse::<u64>() {
                Ok(end) if end >= start => end.min(size.saturating_sub(1)),
                _ => return Ok(None),
            }
        };

        if start >= size {
            return Err(unsatisfiable);
        }
        Ok(Some(ByteRange { start, end }))
    }
}

/// Open media artifact ready to stream
pub struct MediaStream {
    /// Total size of the file on disk
    pub size: u64,
    pub mime_type: &'static str,
    pub path: PathBuf,
    /// Present for partial responses
    pub range: Option<ByteRange>,
    body: BoxStream<'static, Result<Bytes>>,
}

impl MediaStream {
    /// Number of bytes the body will yield
    pub fn content_length(&self) -> u64 {
        self.range.map(|r| r.length()).unwrap_or(self.size)
    }

    pub fn into_body(self) -> BoxStream<'static, Result<Bytes>> {
        self.body
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("size", &self.size)
            .field("mime_type", &self.mime_type)
            .field("path", &self.path)
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct MediaStore {
    layout: Arc<StorageLayout>,
    chunk_size: usize,
}

impl MediaStore {
    pub fn new(layout: Arc<StorageLayout>) -> Self {
        Self {
            layout,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn path_for(&self, track: &TrackId, source: MediaSource) -> PathBuf {
        match source {
            MediaSource::Mixdown => self.layout.mixdown_path(track),
            MediaSource::Stem(stem) => self.layout.stem_path(track, stem),
        }
    }

    /// Stream one stem by name (`bass`, `drum[s]`, `other`, `vocal[s]`)
    pub async fn stream_stem(&self, track: &TrackId, stem_name: &str) -> Result<MediaStream> {
        let stem = Stem::parse(stem_name)?;
        self.open(track, MediaSource::Stem(stem), None).await
    }

    pub async fn stream_mixdown(&self, track: &TrackId) -> Result<MediaStream> {
        self.open(track, MediaSource::Mixdown, None).await
    }

    /// Open a media file, optionally restricted to a byte range
    pub async fn open(
        &self,
        track: &TrackId,
        source: MediaSource,
        range: Option<ByteRange>,
    ) -> Result<MediaStream> {
        let path = self.path_for(track, source);
        let (file, size) = open_media(&path, track, source).await?;
        self.stream_from(file, size, path, track, source, range).await
    }

    /// Open a media file honoring an HTTP `Range` header value
    ///
    /// Unusable headers are ignored and the whole file is streamed.
    pub async fn open_with_range_header(
        &self,
        track: &TrackId,
        source: MediaSource,
        range_header: Option<&str>,
    ) -> Result<MediaStream> {
        let path = self.path_for(track, source);
        let (file, size) = open_media(&path, track, source).await?;
        let range = match range_header {
            Some(header) => ByteRange::parse(header, size)?,
            None => None,
        };
        self.stream_from(file, size, path, track, source, range).await
    }

    async fn stream_from(
        &self,
        mut file: tokio::fs::File,
        size: u64,
        path: PathBuf,
        track: &TrackId,
        source: MediaSource,
        range: Option<ByteRange>,
    ) -> Result<MediaStream> {
        let (offset, length) = match range {
            Some(r) if r.start >= size || r.end >= size => {
                return Err(Error::RangeNotSatisfiable { size });
            }
            Some(r) => (r.start, r.length()),
            None => (0, size),
        };
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }

        debug!(
            track = %track,
            source = source.url_name(),
            size,
            offset,
            length,
            "Opened media stream"
        );

        Ok(MediaStream {
            size,
            mime_type: self.layout.media_format().mime_type(),
            body: chunked_body(file, path.clone(), length, offset + length == size, self.chunk_size),
            path,
            range,
        })
    }

    /// Sources present on disk for `track`
    pub fn available(&self, track: &TrackId) -> Vec<MediaSource> {
        std::iter::once(MediaSource::Mixdown)
            .chain(Stem::ALL.into_iter().map(MediaSource::Stem))
            .filter(|source| self.path_for(track, *source).is_file())
            .collect()
    }

    /// Atomically copy an engine-produced stem into place
    pub fn publish_stem(&self, track: &TrackId, stem: Stem, source: &Path) -> Result<PathBuf> {
        self.publish(track, MediaSource::Stem(stem), source)
    }

    /// Atomically copy the original mix into place
    pub fn publish_mixdown(&self, track: &TrackId, source: &Path) -> Result<PathBuf> {
        self.publish(track, MediaSource::Mixdown, source)
    }

    fn publish(&self, track: &TrackId, source: MediaSource, from: &Path) -> Result<PathBuf> {
        let mut input = match File::open(from) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "{} source file {}",
                    source.url_name(),
                    from.display()
                )));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let dest = self.path_for(track, source);
        write_atomic(&dest, |out| std::io::copy(&mut input, out).map(|_| ()))?;
        debug!(
            track = %track,
            source = source.url_name(),
            path = %dest.display(),
            "Published media"
        );
        Ok(dest)
    }
}

async fn open_media(path: &Path, track: &TrackId, source: MediaSource) -> Result<(tokio::fs::File, u64)> {
    let file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(format!(
                "{} audio for track '{}'",
                source.url_name(),
                track
            )));
        }
        Err(e) => return Err(Error::Io(e)),
    };
    let size = file.metadata().await?.len();
    Ok((file, size))
}

/// `to_eof` marks a body that should end exactly at the announced file end;
/// any byte found past it means the file grew after it was opened.
fn chunked_body(
    file: tokio::fs::File,
    path: PathBuf,
    expected: u64,
    to_eof: bool,
    chunk_size: usize,
) -> BoxStream<'static, Result<Bytes>> {
    let body = async_stream::try_stream! {
        let mut limited = file.take(expected);
        let mut sent: u64 = 0;
        {
            let mut chunks = ReaderStream::with_capacity(&mut limited, chunk_size);
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk.map_err(|e| Error::StreamingIo {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                sent += chunk.len() as u64;
                yield chunk;
            }
        }

        if sent < expected {
            Err::<(), Error>(Error::StreamingIo {
                path: path.clone(),
                reason: format!("file ended after {} of {} bytes", sent, expected),
            })?;
        }

        if to_eof {
            let mut trailing = [0u8; 1];
            let extra = limited
                .into_inner()
                .read(&mut trailing)
                .await
                .map_err(|e| Error::StreamingIo {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            if extra > 0 {
                Err::<(), Error>(Error::StreamingIo {
                    path: path.clone(),
                    reason: format!("file grew past the announced {} bytes", expected),
                })?;
            }
        }
    };
    body.boxed()
}
