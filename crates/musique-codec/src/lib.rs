//! # musique-codec
//!
//! AAC 码流解码核心: 从 raw_data_block 解析到反量化频谱.
//!
//! ## 功能
//!
//! - **码本**: 11 个频谱 Huffman 码本, scale factor 码本, escape 序列, 虚拟码本 16..=31
//! - **ICS**: ics_info, section_data, scale factor (DPCM 与 RVLC), pulse, TNS
//! - **反量化**: `sign(q) * |q|^(4/3) * 2^(0.25 * (sf - 100))`
//! - **立体声**: M/S, 强度立体声, PNS
//! - **SSR**: gain_control_data 解析与 IPQF 合成滤波器组
//! - **PS**: 参数立体声 ICC/IPD/OPD 的 Huffman 解码
//! - **传输层**: ADTS 帧头解析与逐帧解码
//!
//! ## 使用示例
//!
//! ```rust
//! use musique_codec::{AacCoreDecoder, DecoderConfig};
//!
//! let mut decoder = AacCoreDecoder::new(DecoderConfig::default()).unwrap();
//! // 只有 END 元素的空帧
//! let frame = decoder.decode_frame(&[0xE0]).unwrap();
//! assert!(frame.channels.is_empty());
//! ```

pub mod adts;
pub mod decoders;

// 重导出常用类型
pub use adts::{AdtsFrame, AdtsFrames, AdtsHeader, AdtsStreamStats, decode_adts_stream};
pub use decoders::aac::{
    AacCodebooks, AacCoreDecoder, AacProfile, ChannelSpectrum, DecodedFrame, DecoderConfig,
    FrameLength, Ipqf, PsDecoder, PsParameter, PsParameterDecoder,
};
