//! Video file frame source.
//!
//! Decodes a local video file frame-by-frame and signals end-of-stream
//! once the file is exhausted. Playback pacing is not this module's job:
//! the stream controller throttles emission to ~25 fps.
//!
//! Uses FFmpeg behind the `ingest-file-ffmpeg` feature, with a synthetic
//! finite clip for `stub://N` paths (N frames, default 10).

use anyhow::Result;
#[cfg(feature = "ingest-file-ffmpeg")]
use anyhow::Context;
#[cfg(feature = "ingest-file-ffmpeg")]
use ffmpeg_next as ffmpeg;

use super::camera::synthetic_pixels;
use super::{FrameSource, SourceKind};
use crate::frame::Frame;
use crate::{FRAME_HEIGHT, FRAME_WIDTH};

const DEFAULT_STUB_FRAMES: u64 = 10;

pub struct VideoFileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticClip),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFile),
    Closed,
}

impl VideoFileSource {
    /// Open a video file. `stub://N` paths produce a synthetic N-frame clip.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(rest) = path.strip_prefix("stub://") {
            let total = rest.parse().unwrap_or(DEFAULT_STUB_FRAMES);
            log::info!("VideoFileSource: opened {} (synthetic, {} frames)", path, total);
            return Ok(Self {
                backend: FileBackend::Synthetic(SyntheticClip { total, served: 0 }),
            });
        }

        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            let file = FfmpegFile::open(path)?;
            log::info!("VideoFileSource: opened {}", path);
            Ok(Self {
                backend: FileBackend::Ffmpeg(file),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            anyhow::bail!(
                "video file {} requires the ingest-file-ffmpeg feature",
                path
            )
        }
    }
}

impl FrameSource for VideoFileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::VideoFile
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(clip) => clip.read(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(file) => file.read(),
            FileBackend::Closed => Ok(None),
        }
    }

    fn close(&mut self) {
        if !matches!(self.backend, FileBackend::Closed) {
            log::info!("VideoFileSource: released");
        }
        self.backend = FileBackend::Closed;
    }
}

// ----------------------------------------------------------------------------
// Synthetic clip (stub://N) for tests
// ----------------------------------------------------------------------------

struct SyntheticClip {
    total: u64,
    served: u64,
}

impl SyntheticClip {
    fn read(&mut self) -> Result<Option<Frame>> {
        if self.served >= self.total {
            return Ok(None);
        }
        self.served += 1;
        let frame = Frame::from_raw_rgb(synthetic_pixels(self.served), FRAME_WIDTH, FRAME_HEIGHT)?;
        Ok(Some(frame))
    }
}

// ----------------------------------------------------------------------------
// Production decoder using FFmpeg
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-file-ffmpeg")]
struct FfmpegFile {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    flushed: bool,
    finished: bool,
}

#[cfg(feature = "ingest-file-ffmpeg")]
impl FfmpegFile {
    fn open(path: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open video file '{}'", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            flushed: false,
            finished: false,
        })
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb_frame = ffmpeg::frame::Video::empty();
                self.scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("scale frame to RGB")?;
                let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
                return Ok(Some(Frame::from_raw_rgb(pixels, width, height)?));
            }

            if self.flushed {
                self.finished = true;
                return Ok(None);
            }

            match self.input.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() != self.stream_index {
                        continue;
                    }
                    self.decoder
                        .send_packet(&packet)
                        .context("send packet to ffmpeg decoder")?;
                }
                None => {
                    // Drain buffered frames before signalling end-of-stream.
                    let _ = self.decoder.send_eof();
                    self.flushed = true;
                }
            }
        }
    }
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_clip_serves_exactly_n_frames() -> Result<()> {
        let mut source = VideoFileSource::open("stub://4")?;
        for _ in 0..4 {
            assert!(source.read()?.is_some());
        }
        assert!(source.read()?.is_none());
        // End-of-stream is stable.
        assert!(source.read()?.is_none());
        Ok(())
    }

    #[test]
    fn stub_path_without_count_uses_default_length() -> Result<()> {
        let mut source = VideoFileSource::open("stub://clip")?;
        let mut frames = 0;
        while source.read()?.is_some() {
            frames += 1;
        }
        assert_eq!(frames, DEFAULT_STUB_FRAMES);
        Ok(())
    }

    #[test]
    fn close_before_first_read_is_safe() -> Result<()> {
        let mut source = VideoFileSource::open("stub://4")?;
        source.close();
        assert!(source.read()?.is_none());
        Ok(())
    }

    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    #[test]
    fn real_files_require_the_feature() {
        assert!(VideoFileSource::open("/tmp/clip.mp4").is_err());
    }
}
