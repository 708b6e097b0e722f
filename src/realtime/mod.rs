// Realtime recording subsystem for EchoNote Core

mod recorder;

pub use recorder::{
    RealtimeRecorder, RecorderControl, RecordingArtifacts, RecordingOptions, SourceFactory,
};
