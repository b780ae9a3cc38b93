//! # musique
//!
//! 纯 Rust 实现的 AAC 码流解码核心.
//!
//! 从 raw_data_block 解析到反量化频谱, 另含 SSR 增益控制合成滤波器组
//! 与参数立体声 Huffman 解码. 时域变换 (IMDCT) 不在范围内.
//!
//! # 快速开始
//!
//! ```rust
//! use musique::codec::{AacCoreDecoder, DecoderConfig};
//!
//! let mut decoder = AacCoreDecoder::new(DecoderConfig::default()).unwrap();
//! let frame = decoder.decode_frame(&[0xE0]).unwrap();
//! assert!(frame.channels.is_empty());
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `musique-core` | 比特流读取与错误类型 |
//! | `musique-codec` | AAC 解码核心与 ADTS 传输层 |

pub mod logging;

/// 比特流读取与错误类型
pub use musique_core as core;

/// AAC 解码核心
pub use musique_codec as codec;

/// 获取 musique 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
