mod settings;

pub use settings::{
    BatchSettings, OtelConfig, RetrySettings, SchedulerConfig, Settings, TransportConfig,
};
