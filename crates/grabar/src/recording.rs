//! In-process video recording.
//!
//! [`VideoRecorder`] collects JPEG-encoded frames and muxes them into a
//! minimal MP4 on stop: `ftyp`, one `mdat` holding the frames back to back,
//! and a `moov` describing them as a single motion-JPEG track with one
//! sample per chunk. No external encoder is involved.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, RgbImage};

use crate::result::{GrabarError, GrabarResult};

/// Recording parameters for one context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConfig {
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Frames per second
    pub fps: u32,
    /// JPEG quality, 1 to 100
    pub jpeg_quality: u8,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 10,
            jpeg_quality: 80,
        }
    }
}

impl VideoConfig {
    /// Media timescale: 100 units per frame.
    #[must_use]
    pub const fn timescale(&self) -> u32 {
        self.fps * 100
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecorderState {
    Idle,
    Recording,
    Stopped,
}

/// Accumulates frames for one scene and produces the MP4 bytes.
#[derive(Debug)]
pub struct VideoRecorder {
    config: VideoConfig,
    frames: Vec<Vec<u8>>,
    state: RecorderState,
}

impl VideoRecorder {
    /// Recorder in the idle state.
    #[must_use]
    pub fn new(config: VideoConfig) -> Self {
        Self {
            config,
            frames: Vec::new(),
            state: RecorderState::Idle,
        }
    }

    /// Begin accepting frames.
    pub fn start(&mut self) -> GrabarResult<()> {
        if self.state != RecorderState::Idle {
            return Err(GrabarError::InvalidState {
                message: format!("recorder started in state {:?}", self.state),
            });
        }
        self.state = RecorderState::Recording;
        Ok(())
    }

    /// Encode an RGB frame, resizing to the configured dimensions when they
    /// differ.
    pub fn add_frame(&mut self, frame: &RgbImage) -> GrabarResult<()> {
        self.ensure_recording()?;
        let resized;
        let frame = if frame.dimensions() == (self.config.width, self.config.height) {
            frame
        } else {
            resized = image::imageops::resize(
                frame,
                self.config.width,
                self.config.height,
                FilterType::Lanczos3,
            );
            &resized
        };
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.config.jpeg_quality)
            .encode(
                frame.as_raw(),
                self.config.width,
                self.config.height,
                ExtendedColorType::Rgb8,
            )
            .map_err(|e| GrabarError::VideoRecording {
                message: format!("jpeg encode failed: {e}"),
            })?;
        self.frames.push(jpeg);
        Ok(())
    }

    /// Append an already JPEG-encoded frame, as delivered by screencast
    /// capture.
    pub fn add_encoded_frame(&mut self, jpeg: Vec<u8>) -> GrabarResult<()> {
        self.ensure_recording()?;
        self.frames.push(jpeg);
        Ok(())
    }

    /// Frames collected so far.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Finish the recording and return the MP4 bytes.
    pub fn stop(&mut self) -> GrabarResult<Vec<u8>> {
        self.ensure_recording()?;
        self.state = RecorderState::Stopped;
        if self.frames.is_empty() {
            return Err(GrabarError::VideoRecording {
                message: "no frames captured".to_string(),
            });
        }
        Ok(self.mux())
    }

    fn ensure_recording(&self) -> GrabarResult<()> {
        if self.state != RecorderState::Recording {
            return Err(GrabarError::InvalidState {
                message: format!("recorder used in state {:?}", self.state),
            });
        }
        Ok(())
    }

    fn mux(&self) -> Vec<u8> {
        let ftyp = ftyp_box();
        let mdat = mdat_box(&self.frames);
        // Sample offsets are absolute file offsets into mdat payload.
        let mut offset =
            u32::try_from(ftyp.len()).unwrap_or(u32::MAX).saturating_add(8);
        let mut offsets = Vec::with_capacity(self.frames.len());
        for frame in &self.frames {
            offsets.push(offset);
            offset = offset.saturating_add(u32::try_from(frame.len()).unwrap_or(u32::MAX));
        }
        let moov = moov_box(&self.config, &self.frames, &offsets);

        let mut out = Vec::with_capacity(ftyp.len() + mdat.len() + moov.len());
        out.extend_from_slice(&ftyp);
        out.extend_from_slice(&mdat);
        out.extend_from_slice(&moov);
        out
    }
}

fn boxed(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let size = u32::try_from(payload.len() + 8).unwrap_or(u32::MAX);
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(box_type);
    out.extend_from_slice(payload);
    out
}

fn ftyp_box() -> Vec<u8> {
    let mut payload = Vec::with_capacity(20);
    payload.extend_from_slice(b"isom");
    payload.extend_from_slice(&0x200u32.to_be_bytes());
    payload.extend_from_slice(b"isom");
    payload.extend_from_slice(b"iso2");
    payload.extend_from_slice(b"mp41");
    boxed(b"ftyp", &payload)
}

fn mdat_box(frames: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = frames.iter().map(Vec::len).sum();
    let mut payload = Vec::with_capacity(total);
    for frame in frames {
        payload.extend_from_slice(frame);
    }
    boxed(b"mdat", &payload)
}

fn moov_box(config: &VideoConfig, frames: &[Vec<u8>], offsets: &[u32]) -> Vec<u8> {
    let duration = u32::try_from(frames.len() as u64 * 100).unwrap_or(u32::MAX);
    let mut payload = Vec::new();
    payload.extend_from_slice(&mvhd_box(config, duration));
    payload.extend_from_slice(&trak_box(config, frames, offsets, duration));
    boxed(b"moov", &payload)
}

fn mvhd_box(config: &VideoConfig, duration: u32) -> Vec<u8> {
    let mut p = Vec::with_capacity(100);
    p.extend_from_slice(&[0, 0, 0, 0]); // version and flags
    p.extend_from_slice(&0u32.to_be_bytes()); // creation time
    p.extend_from_slice(&0u32.to_be_bytes()); // modification time
    p.extend_from_slice(&config.timescale().to_be_bytes());
    p.extend_from_slice(&duration.to_be_bytes());
    p.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate 1.0
    p.extend_from_slice(&0x0100u16.to_be_bytes()); // volume 1.0
    p.extend_from_slice(&[0; 10]); // reserved
    p.extend_from_slice(&unity_matrix());
    p.extend_from_slice(&[0; 24]); // predefined
    p.extend_from_slice(&2u32.to_be_bytes()); // next track id
    boxed(b"mvhd", &p)
}

fn trak_box(config: &VideoConfig, frames: &[Vec<u8>], offsets: &[u32], duration: u32) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&tkhd_box(config, duration));
    p.extend_from_slice(&mdia_box(config, frames, offsets, duration));
    boxed(b"trak", &p)
}

fn tkhd_box(config: &VideoConfig, duration: u32) -> Vec<u8> {
    let mut p = Vec::with_capacity(84);
    p.extend_from_slice(&[0, 0, 0, 7]); // enabled, in movie, in preview
    p.extend_from_slice(&0u32.to_be_bytes()); // creation time
    p.extend_from_slice(&0u32.to_be_bytes()); // modification time
    p.extend_from_slice(&1u32.to_be_bytes()); // track id
    p.extend_from_slice(&0u32.to_be_bytes()); // reserved
    p.extend_from_slice(&duration.to_be_bytes());
    p.extend_from_slice(&[0; 8]); // reserved
    p.extend_from_slice(&0u16.to_be_bytes()); // layer
    p.extend_from_slice(&0u16.to_be_bytes()); // alternate group
    p.extend_from_slice(&0u16.to_be_bytes()); // volume (video)
    p.extend_from_slice(&0u16.to_be_bytes()); // reserved
    p.extend_from_slice(&unity_matrix());
    p.extend_from_slice(&(config.width << 16).to_be_bytes()); // fixed point 16.16
    p.extend_from_slice(&(config.height << 16).to_be_bytes());
    boxed(b"tkhd", &p)
}

fn mdia_box(config: &VideoConfig, frames: &[Vec<u8>], offsets: &[u32], duration: u32) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&mdhd_box(config, duration));
    p.extend_from_slice(&hdlr_box());
    p.extend_from_slice(&minf_box(config, frames, offsets));
    boxed(b"mdia", &p)
}

fn mdhd_box(config: &VideoConfig, duration: u32) -> Vec<u8> {
    let mut p = Vec::with_capacity(24);
    p.extend_from_slice(&[0, 0, 0, 0]);
    p.extend_from_slice(&0u32.to_be_bytes()); // creation time
    p.extend_from_slice(&0u32.to_be_bytes()); // modification time
    p.extend_from_slice(&config.timescale().to_be_bytes());
    p.extend_from_slice(&duration.to_be_bytes());
    p.extend_from_slice(&0x55c4u16.to_be_bytes()); // language: und
    p.extend_from_slice(&0u16.to_be_bytes()); // predefined
    boxed(b"mdhd", &p)
}

fn hdlr_box() -> Vec<u8> {
    let mut p = Vec::with_capacity(37);
    p.extend_from_slice(&[0, 0, 0, 0]);
    p.extend_from_slice(&0u32.to_be_bytes()); // predefined
    p.extend_from_slice(b"vide");
    p.extend_from_slice(&[0; 12]); // reserved
    p.extend_from_slice(b"VideoHandler\0");
    boxed(b"hdlr", &p)
}

fn minf_box(config: &VideoConfig, frames: &[Vec<u8>], offsets: &[u32]) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&vmhd_box());
    p.extend_from_slice(&dinf_box());
    p.extend_from_slice(&stbl_box(config, frames, offsets));
    boxed(b"minf", &p)
}

fn vmhd_box() -> Vec<u8> {
    let mut p = Vec::with_capacity(12);
    p.extend_from_slice(&[0, 0, 0, 1]);
    p.extend_from_slice(&[0; 8]); // graphics mode and opcolor
    boxed(b"vmhd", &p)
}

fn dinf_box() -> Vec<u8> {
    let mut url = Vec::with_capacity(4);
    url.extend_from_slice(&[0, 0, 0, 1]); // self-contained
    let url = boxed(b"url ", &url);

    let mut dref = Vec::with_capacity(url.len() + 8);
    dref.extend_from_slice(&[0, 0, 0, 0]);
    dref.extend_from_slice(&1u32.to_be_bytes()); // entry count
    dref.extend_from_slice(&url);
    boxed(b"dinf", &boxed(b"dref", &dref))
}

fn stbl_box(config: &VideoConfig, frames: &[Vec<u8>], offsets: &[u32]) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&stsd_box(config));
    p.extend_from_slice(&stts_box(frames.len()));
    p.extend_from_slice(&stsc_box());
    p.extend_from_slice(&stsz_box(frames));
    p.extend_from_slice(&stco_box(offsets));
    boxed(b"stbl", &p)
}

fn stsd_box(config: &VideoConfig) -> Vec<u8> {
    let mut entry = Vec::with_capacity(78);
    entry.extend_from_slice(&[0; 6]); // reserved
    entry.extend_from_slice(&1u16.to_be_bytes()); // data reference index
    entry.extend_from_slice(&[0; 16]); // predefined and reserved
    entry.extend_from_slice(&u16::try_from(config.width).unwrap_or(u16::MAX).to_be_bytes());
    entry.extend_from_slice(&u16::try_from(config.height).unwrap_or(u16::MAX).to_be_bytes());
    entry.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // 72 dpi horizontal
    entry.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // 72 dpi vertical
    entry.extend_from_slice(&0u32.to_be_bytes()); // reserved
    entry.extend_from_slice(&1u16.to_be_bytes()); // frames per sample
    entry.extend_from_slice(&[0; 32]); // compressor name
    entry.extend_from_slice(&0x0018u16.to_be_bytes()); // depth
    entry.extend_from_slice(&0xffffu16.to_be_bytes()); // predefined
    let entry = boxed(b"jpeg", &entry);

    let mut p = Vec::with_capacity(entry.len() + 8);
    p.extend_from_slice(&[0, 0, 0, 0]);
    p.extend_from_slice(&1u32.to_be_bytes()); // entry count
    p.extend_from_slice(&entry);
    boxed(b"stsd", &p)
}

fn stts_box(frame_count: usize) -> Vec<u8> {
    let mut p = Vec::with_capacity(16);
    p.extend_from_slice(&[0, 0, 0, 0]);
    p.extend_from_slice(&1u32.to_be_bytes()); // entry count
    p.extend_from_slice(&u32::try_from(frame_count).unwrap_or(u32::MAX).to_be_bytes());
    p.extend_from_slice(&100u32.to_be_bytes()); // delta per frame in timescale units
    boxed(b"stts", &p)
}

fn stsc_box() -> Vec<u8> {
    let mut p = Vec::with_capacity(20);
    p.extend_from_slice(&[0, 0, 0, 0]);
    p.extend_from_slice(&1u32.to_be_bytes()); // entry count
    p.extend_from_slice(&1u32.to_be_bytes()); // first chunk
    p.extend_from_slice(&1u32.to_be_bytes()); // samples per chunk
    p.extend_from_slice(&1u32.to_be_bytes()); // sample description index
    boxed(b"stsc", &p)
}

fn stsz_box(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut p = Vec::with_capacity(12 + frames.len() * 4);
    p.extend_from_slice(&[0, 0, 0, 0]);
    p.extend_from_slice(&0u32.to_be_bytes()); // per-sample sizes follow
    p.extend_from_slice(&u32::try_from(frames.len()).unwrap_or(u32::MAX).to_be_bytes());
    for frame in frames {
        p.extend_from_slice(&u32::try_from(frame.len()).unwrap_or(u32::MAX).to_be_bytes());
    }
    boxed(b"stsz", &p)
}

fn stco_box(offsets: &[u32]) -> Vec<u8> {
    let mut p = Vec::with_capacity(8 + offsets.len() * 4);
    p.extend_from_slice(&[0, 0, 0, 0]);
    p.extend_from_slice(&u32::try_from(offsets.len()).unwrap_or(u32::MAX).to_be_bytes());
    for offset in offsets {
        p.extend_from_slice(&offset.to_be_bytes());
    }
    boxed(b"stco", &p)
}

fn unity_matrix() -> [u8; 36] {
    let mut m = [0u8; 36];
    m[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    m[16..20].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    m[32..36].copy_from_slice(&0x4000_0000u32.to_be_bytes());
    m
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, image::Rgb([40, 90, 200]))
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    mod state_tests {
        use super::*;

        #[test]
        fn test_frames_rejected_before_start() {
            let mut recorder = VideoRecorder::new(VideoConfig::default());
            let err = recorder.add_frame(&solid_frame(1280, 720)).unwrap_err();
            assert!(matches!(err, GrabarError::InvalidState { .. }));
        }

        #[test]
        fn test_double_start_rejected() {
            let mut recorder = VideoRecorder::new(VideoConfig::default());
            recorder.start().unwrap();
            assert!(recorder.start().is_err());
        }

        #[test]
        fn test_stop_without_frames_is_recording_error() {
            let mut recorder = VideoRecorder::new(VideoConfig::default());
            recorder.start().unwrap();
            let err = recorder.stop().unwrap_err();
            assert!(matches!(err, GrabarError::VideoRecording { .. }));
        }
    }

    mod mux_tests {
        use super::*;

        #[test]
        fn test_output_carries_required_boxes() {
            let config = VideoConfig {
                width: 64,
                height: 48,
                ..VideoConfig::default()
            };
            let mut recorder = VideoRecorder::new(config);
            recorder.start().unwrap();
            for _ in 0..3 {
                recorder.add_frame(&solid_frame(64, 48)).unwrap();
            }
            assert_eq!(recorder.frame_count(), 3);
            let mp4 = recorder.stop().unwrap();
            assert_eq!(&mp4[4..8], b"ftyp");
            assert!(contains(&mp4, b"mdat"));
            assert!(contains(&mp4, b"moov"));
            assert!(contains(&mp4, b"stco"));
            assert!(contains(&mp4, b"jpeg"));
        }

        #[test]
        fn test_mismatched_frames_are_resized() {
            let config = VideoConfig {
                width: 64,
                height: 48,
                ..VideoConfig::default()
            };
            let mut recorder = VideoRecorder::new(config);
            recorder.start().unwrap();
            recorder.add_frame(&solid_frame(128, 96)).unwrap();
            assert_eq!(recorder.frame_count(), 1);
        }

        #[test]
        fn test_encoded_frames_are_stored_verbatim() {
            let mut recorder = VideoRecorder::new(VideoConfig::default());
            recorder.start().unwrap();
            recorder
                .add_encoded_frame(vec![0xff, 0xd8, 0xff, 0xd9])
                .unwrap();
            let mp4 = recorder.stop().unwrap();
            assert!(contains(&mp4, &[0xff, 0xd8, 0xff, 0xd9]));
        }
    }
}
