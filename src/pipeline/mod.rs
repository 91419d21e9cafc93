pub mod frame_queue;
pub mod rate;
pub mod stereo;

pub use frame_queue::{FrameQueue, QueueStats};
pub use rate::Rate;
pub use stereo::{
    find_cameras, CameraState, MatchedPair, Side, StereoCamera, StereoSettings, SyncError,
    SyncEvent, SyncStats,
};
