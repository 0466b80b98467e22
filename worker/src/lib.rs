pub mod config;
pub mod cpu;
pub mod error;
pub mod kernel;
pub mod worker;

pub use config::WorkerConfig;
pub use cpu::CpuKernel;
pub use error::WorkerErr;
pub use kernel::Kernel;
pub use worker::Worker;
