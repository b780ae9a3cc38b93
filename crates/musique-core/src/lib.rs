//! # musique-core
//!
//! musique 音频解码核心库, 提供比特流读取与统一错误类型.
//!
//! 所有解码模块都建立在 [`bitreader::BitReader`] 之上, 出错时统一返回 [`MusiqueError`].

pub mod bitreader;
pub mod bitwriter;
pub mod error;

// 重导出常用类型
pub use bitreader::BitReader;
pub use bitwriter::BitWriter;
pub use error::{MusiqueError, MusiqueResult};
