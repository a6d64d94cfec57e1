pub mod bins;
pub mod exec_policy;
pub mod fsx;
pub mod lock;
pub mod process;
