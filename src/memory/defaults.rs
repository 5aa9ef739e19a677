//! Default alignment, names and pool sizes.
//!
//! Pool slot sizes follow typical media payloads:
//! - Video frames: 1080p BGRA = 8.3MB, 720p BGRA = 3.7MB
//! - Audio buffers: 48kHz stereo float32, 1024 samples = 8KB
//! - Network packets: up to 64KB (UDP max)

/// Alignment mask every allocation honours (8-byte boundary).
pub const DEFAULT_ALIGN_MASK: usize = 7;

/// Registry name of the system allocator.
pub const SYSTEM_MEMORY: &str = "SystemMemory";

/// Alignment of pool arenas (one cache line).
pub const POOL_ARENA_ALIGN: usize = 64;

// =============================================================================
// Slot Sizes (bytes)
// =============================================================================

/// Slot size for 1080p BGRA video frames (1920 * 1080 * 4 = 8,294,400 bytes).
pub const VIDEO_1080P_SLOT_SIZE: usize = video_frame_size(1920, 1080, 4);

/// Slot size for 720p BGRA video frames (1280 * 720 * 4 = 3,686,400 bytes).
pub const VIDEO_720P_SLOT_SIZE: usize = video_frame_size(1280, 720, 4);

/// Slot size for audio chunks (48kHz stereo float32, 1024 samples).
pub const AUDIO_SLOT_SIZE: usize = 1024 * 2 * 4;

/// Slot size for network payloads.
pub const NETWORK_SLOT_SIZE: usize = 64 * 1024;

// =============================================================================
// Slot Counts
// =============================================================================

/// Slot count for video pools; about one second at 30fps.
pub const VIDEO_SLOT_COUNT: usize = 32;

/// Slot count for audio pools.
pub const AUDIO_SLOT_COUNT: usize = 64;

/// Slot count for network pools.
pub const NETWORK_SLOT_COUNT: usize = 32;

/// Bytes of one raw video frame.
pub const fn video_frame_size(width: usize, height: usize, bytes_per_pixel: usize) -> usize {
    width * height * bytes_per_pixel
}
