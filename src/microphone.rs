use anyhow::Result;
use async_trait::async_trait;

/// A captured local audio stream. Tracks must be stopped once probing is done
/// so the device is not held.
pub trait LocalAudioStream: Send {
    fn track_count(&self) -> usize;
    fn stop_tracks(&mut self);
}

/// Grants (or refuses) access to the operator's microphone.
#[async_trait]
pub trait MicrophoneAccess: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn LocalAudioStream>>;
}

/// Headless hosts have no permission prompt; access is always granted.
#[derive(Debug, Default, Clone)]
pub struct GrantedMicrophone;

struct NullStream {
    live: usize,
}

impl LocalAudioStream for NullStream {
    fn track_count(&self) -> usize {
        self.live
    }

    fn stop_tracks(&mut self) {
        self.live = 0;
    }
}

#[async_trait]
impl MicrophoneAccess for GrantedMicrophone {
    async fn acquire(&self) -> Result<Box<dyn LocalAudioStream>> {
        Ok(Box::new(NullStream { live: 1 }))
    }
}
