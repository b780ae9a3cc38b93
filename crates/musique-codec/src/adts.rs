//! ADTS 传输层.
//!
//! ADTS (Audio Data Transport Stream) 是 AAC 最常见的裸流封装格式.
//! 每个 ADTS 帧由 7 字节头部 (有 CRC 时为 9 字节) 加一个 raw_data_block 组成.
//!
//! ```text
//! 固定头部:
//!   syncword (12) = 0xFFF, ID (1), layer (2) = 0, protection_absent (1)
//!   profile (2), sampling_frequency_index (4), private_bit (1)
//!   channel_configuration (3), original_copy (1), home (1)
//! 可变头部:
//!   copyright_id_bit (1), copyright_id_start (1)
//!   frame_length (13), adts_buffer_fullness (11), number_of_raw_data_blocks (2)
//! [crc_check (16)] 仅当 protection_absent = 0
//! ```

use log::{debug, warn};
use musique_core::bitreader::BitReader;
use musique_core::{MusiqueError, MusiqueResult};

use crate::decoders::aac::{AacCoreDecoder, DecodedFrame, DecoderConfig};

/// ADTS 同步字
pub const ADTS_SYNC: u32 = 0xFFF;

/// ADTS 帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// true: MPEG-2, false: MPEG-4
    pub mpeg2: bool,
    pub protection_absent: bool,
    /// profile (0=Main, 1=LC, 2=SSR, 3=LTP), 即 audioObjectType - 1
    pub profile: u8,
    pub sample_rate_index: u8,
    pub channel_config: u8,
    /// 帧总长度 (含头部)
    pub frame_length: usize,
    pub buffer_fullness: u16,
    /// number_of_raw_data_blocks_in_frame + 1
    pub raw_data_blocks: u8,
    /// 头部长度 (7 或 9 字节)
    pub header_len: usize,
}

impl AdtsHeader {
    /// 从帧起始处解析头部
    pub fn parse(data: &[u8]) -> MusiqueResult<Self> {
        let mut br = BitReader::new(data);
        if br.peek_bits(12)? != ADTS_SYNC {
            return Err(MusiqueError::InvalidData("ADTS: 同步字不匹配".into()));
        }
        br.skip_bits(12)?;
        let mpeg2 = br.read_bool()?;
        let layer = br.read_bits(2)?;
        if layer != 0 {
            return Err(MusiqueError::InvalidData(format!("ADTS: layer={} 非 0", layer)));
        }
        let protection_absent = br.read_bool()?;
        let profile = br.read_bits(2)? as u8;
        let sample_rate_index = br.read_bits(4)? as u8;
        let _private = br.read_bit()?;
        let channel_config = br.read_bits(3)? as u8;
        br.skip_bits(4)?; // original_copy, home, copyright_id_bit, copyright_id_start
        let frame_length = br.read_bits(13)? as usize;
        let buffer_fullness = br.read_bits(11)? as u16;
        let raw_data_blocks = br.read_bits(2)? as u8 + 1;

        if sample_rate_index >= 13 {
            return Err(MusiqueError::InvalidData(format!(
                "ADTS: 保留的采样率索引 {}",
                sample_rate_index
            )));
        }
        let header_len = if protection_absent { 7 } else { 9 };
        if frame_length < header_len {
            return Err(MusiqueError::InvalidData(format!(
                "ADTS: frame_length={} 小于头部长度 {}",
                frame_length, header_len
            )));
        }

        Ok(Self {
            mpeg2,
            protection_absent,
            profile,
            sample_rate_index,
            channel_config,
            frame_length,
            buffer_fullness,
            raw_data_blocks,
            header_len,
        })
    }
}

/// 一个 ADTS 帧
#[derive(Debug, Clone, Copy)]
pub struct AdtsFrame<'a> {
    /// 帧在输入中的字节偏移
    pub offset: usize,
    pub header: AdtsHeader,
    /// raw_data_block 数据 (不含头部与 CRC)
    pub payload: &'a [u8],
}

/// 逐帧遍历 ADTS 字节流
///
/// 同步字丢失时按字节向后搜索. frame_length 越过数据末尾的帧头视为伪同步,
/// 继续向后搜索; 之后再无可用帧时作为不完整的尾帧丢弃.
pub struct AdtsFrames<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AdtsFrames<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for AdtsFrames<'a> {
    type Item = AdtsFrame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let resync_from = self.pos;
        // 第一个越过数据末尾的候选帧头, 之后没有可用帧时按不完整的尾帧丢弃
        let mut overrun: Option<(usize, usize)> = None;
        while self.pos + 7 <= self.data.len() {
            let rest = &self.data[self.pos..];
            let header = match AdtsHeader::parse(rest) {
                Ok(header) => header,
                Err(_) => {
                    self.pos += 1;
                    continue;
                }
            };
            if header.frame_length > rest.len() {
                // 可能是数据中的伪同步字, 继续逐字节搜索
                overrun.get_or_insert((self.pos, header.frame_length));
                self.pos += 1;
                continue;
            }
            if self.pos != resync_from {
                warn!(
                    "ADTS: 跳过 {} 字节后重新同步 (偏移 {})",
                    self.pos - resync_from,
                    self.pos
                );
            }
            let frame = AdtsFrame {
                offset: self.pos,
                header,
                payload: &rest[header.header_len..header.frame_length],
            };
            self.pos += header.frame_length;
            return Some(frame);
        }
        if let Some((offset, frame_length)) = overrun {
            warn!(
                "ADTS: 偏移 {} 处的帧不完整 ({} / {} 字节), 丢弃",
                offset,
                self.data.len() - offset,
                frame_length
            );
        }
        self.pos = self.data.len();
        None
    }
}

/// ADTS 流解码统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdtsStreamStats {
    pub frames_decoded: usize,
    pub frames_dropped: usize,
}

/// 解码整个 ADTS 流
///
/// 解码器由第一个有效帧头配置, 帧头参数变化时重新配置.
/// 单帧解码失败只丢弃该帧, 不中断整个流.
pub fn decode_adts_stream(
    data: &[u8],
    mut on_frame: impl FnMut(&AdtsFrame<'_>, &DecodedFrame),
) -> MusiqueResult<AdtsStreamStats> {
    let mut stats = AdtsStreamStats::default();
    let mut slot: Option<AacCoreDecoder> = None;

    for frame in AdtsFrames::new(data) {
        let config = match DecoderConfig::from_adts(&frame.header) {
            Ok(config) => config,
            Err(e) => {
                warn!("ADTS: 偏移 {} 的帧头无法使用: {}", frame.offset, e);
                stats.frames_dropped += 1;
                continue;
            }
        };
        let decoder = match slot.take() {
            Some(mut dec) => {
                if dec.config() != &config {
                    debug!("ADTS: 偏移 {} 处参数变化, 重新配置解码器", frame.offset);
                    dec.reconfigure(config)?;
                }
                dec
            }
            None => AacCoreDecoder::new(config)?,
        };
        let decoder = slot.insert(decoder);
        if frame.header.raw_data_blocks > 1 {
            debug!(
                "ADTS: 帧包含 {} 个 raw_data_block, 仅解码第一个",
                frame.header.raw_data_blocks
            );
        }

        match decoder.decode_frame(frame.payload) {
            Ok(decoded) => {
                stats.frames_decoded += 1;
                on_frame(&frame, decoded);
            }
            Err(e) => {
                warn!("ADTS: 偏移 {} 的帧解码失败, 丢弃: {}", frame.offset, e);
                stats.frames_dropped += 1;
            }
        }
    }

    debug!(
        "ADTS: 解码 {} 帧, 丢弃 {} 帧",
        stats.frames_decoded, stats.frames_dropped
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// profile=LC, sr_index=4 (44100), 单声道
    fn build_adts_frame(payload: &[u8]) -> Vec<u8> {
        let frame_length = 7 + payload.len();
        let mut frame = vec![0u8; 7];
        frame[0] = 0xFF;
        frame[1] = 0xF1;
        // profile(01) + sr_index(0100) + private(0) + ch 高 1 位(0)
        frame[2] = 0x50;
        // ch 低 2 位(01) + 0000 + frame_length 高 2 位
        frame[3] = 0x40 | ((frame_length >> 11) as u8 & 0x03);
        frame[4] = (frame_length >> 3) as u8;
        frame[5] = ((frame_length & 0x07) as u8) << 5 | 0x1F;
        frame[6] = 0xFC;
        frame.extend_from_slice(payload);
        frame
    }

    /// 只有 END 元素的 raw_data_block
    const END_ONLY: [u8; 1] = [0xE0];

    #[test]
    fn test_adts_header_parse() {
        let frame = build_adts_frame(&[0xAA; 10]);
        let header = AdtsHeader::parse(&frame).unwrap();
        assert_eq!(header.profile, 1);
        assert_eq!(header.sample_rate_index, 4);
        assert_eq!(header.channel_config, 1);
        assert_eq!(header.frame_length, 17);
        assert!(header.protection_absent);
        assert_eq!(header.header_len, 7);
        assert_eq!(header.raw_data_blocks, 1);
        assert_eq!(header.buffer_fullness, 0x7FF);
    }

    #[test]
    fn test_adts_invalid_sync() {
        assert!(matches!(
            AdtsHeader::parse(&[0u8; 7]),
            Err(MusiqueError::InvalidData(_))
        ));
        assert!(AdtsHeader::parse(&[0xFF]).unwrap_err().is_truncated());
    }

    #[test]
    fn test_帧遍历与重新同步() {
        let mut data = build_adts_frame(&[1, 2, 3]);
        data.extend_from_slice(&[0x00, 0x12, 0x34]);
        data.extend(build_adts_frame(&[4, 5]));

        let frames: Vec<_> = AdtsFrames::new(&data).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].offset, 0);
        assert_eq!(frames[0].payload, &[1, 2, 3]);
        assert_eq!(frames[1].offset, 13);
        assert_eq!(frames[1].payload, &[4, 5]);
    }

    #[test]
    fn test_末尾不完整帧() {
        let mut data = build_adts_frame(&[1, 2, 3]);
        let tail = build_adts_frame(&[9; 20]);
        data.extend_from_slice(&tail[..12]);
        assert_eq!(AdtsFrames::new(&data).count(), 1);
    }

    #[test]
    fn test_伪同步字不吞掉后续帧() {
        let mut data = build_adts_frame(&END_ONLY);
        // 合法帧头, 但 frame_length = 8191 远超剩余数据
        data.extend_from_slice(&[0xFF, 0xF1, 0x50, 0x43, 0xFF, 0xFF, 0xFC]);
        for _ in 0..5 {
            data.extend(build_adts_frame(&END_ONLY));
        }

        let frames: Vec<_> = AdtsFrames::new(&data).collect();
        assert_eq!(frames.len(), 6);
        assert_eq!(frames[0].offset, 0);
        assert_eq!(frames[1].offset, 15);
        assert!(frames.iter().all(|f| f.payload == END_ONLY));

        let stats = decode_adts_stream(&data, |_, _| {}).unwrap();
        assert_eq!(stats.frames_decoded, 6);
        assert_eq!(stats.frames_dropped, 0);
    }

    #[test]
    fn test_解码流_丢弃坏帧() {
        let mut data = build_adts_frame(&END_ONLY);
        // CCE 元素, 不支持
        data.extend(build_adts_frame(&[0x40, 0x00]));
        data.extend(build_adts_frame(&END_ONLY));

        let mut offsets = Vec::new();
        let stats = decode_adts_stream(&data, |frame, decoded| {
            assert!(decoded.channels.is_empty());
            offsets.push(frame.offset);
        })
        .unwrap();
        assert_eq!(stats.frames_decoded, 2);
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(offsets, vec![0, 17]);
    }
}
