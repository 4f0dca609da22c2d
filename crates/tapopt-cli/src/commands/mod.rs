pub mod baseline;
pub mod count_taps;
pub mod init_config;
pub mod optimize;
