pub mod sequencer;

pub use sequencer::{ActionSequencer, DeliveryPolicy, SequencePhase, SequencerEvent};
