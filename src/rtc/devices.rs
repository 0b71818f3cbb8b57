use async_trait::async_trait;

use crate::config::MediaConfig;
use crate::error::MediaError;
use crate::rtc::{LocalMedia, LocalTrack, MediaDevices, SourceKind, TrackKind};

/// Hands out sample-fed tracks: H264 for video, Opus for audio.
///
/// The tracks are negotiated like real capture tracks; whatever writes
/// samples into them is outside this crate.
pub struct SampleTrackDevices {
    video: bool,
    audio: bool,
}

impl SampleTrackDevices {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            video: config.video,
            audio: config.audio,
        }
    }
}

#[async_trait]
impl MediaDevices for SampleTrackDevices {
    async fn acquire_camera_and_microphone(&self) -> Result<LocalMedia, MediaError> {
        let mut tracks = Vec::new();
        if self.video {
            tracks.push(LocalTrack::sample(TrackKind::Video, "camera-video", "camera"));
        }
        if self.audio {
            tracks.push(LocalTrack::sample(TrackKind::Audio, "microphone", "camera"));
        }
        if tracks.is_empty() {
            return Err(MediaError::NoDevice);
        }
        info!("Acquired camera source with {} tracks", tracks.len());
        Ok(LocalMedia::new(SourceKind::Camera, tracks))
    }

    async fn acquire_screen_share(&self) -> Result<LocalMedia, MediaError> {
        if !self.video {
            return Err(MediaError::Other("video is disabled in the config".into()));
        }
        Ok(LocalMedia::new(
            SourceKind::Screen,
            vec![LocalTrack::sample(TrackKind::Video, "screen-video", "screen")],
        ))
    }
}
