pub mod config;
pub mod lyrics;
pub mod netease;
pub mod storage;
