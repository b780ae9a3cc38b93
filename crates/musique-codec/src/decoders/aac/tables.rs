//! AAC 常量表: 采样率, scalefactor band 边界, TNS 频带上限.

use std::sync::OnceLock;

use musique_core::{MusiqueError, MusiqueResult};

use super::config::FrameLength;

/// 采样率索引表 (13-15 保留)
pub const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// 零频谱码本
pub const ZERO_HCB: u8 = 0;
/// escape 码本
pub const ESC_HCB: u8 = 11;
/// 感知噪声替代 (PNS)
pub const NOISE_HCB: u8 = 13;
/// 强度立体声, 反相
pub const INTENSITY_HCB2: u8 = 14;
/// 强度立体声, 同相
pub const INTENSITY_HCB: u8 = 15;

/// 噪声能量基准偏移 (global_gain - 90 - 256 + pcm)
pub const NOISE_OFFSET: i32 = 90;
/// 第一个噪声频带 9 位 PCM 的偏置
pub const NOISE_PRE: i32 = 256;
/// 第一个噪声频带 PCM 位数
pub const NOISE_PRE_BITS: u32 = 9;

/// scalefactor band 数上限 (32kHz 长窗)
pub const MAX_SWB: usize = 51;
/// 窗口组数上限
pub const MAX_WINDOW_GROUPS: usize = 8;

/// TNS 长窗可用频带上限 (按采样率索引)
pub const TNS_MAX_BANDS_LONG: [usize; 13] = [31, 31, 34, 40, 42, 51, 46, 46, 42, 42, 42, 39, 39];
/// TNS 短窗可用频带上限
pub const TNS_MAX_BANDS_SHORT: [usize; 13] = [9, 9, 10, 14, 14, 14, 14, 14, 14, 14, 14, 14, 14];

#[rustfmt::skip]
const SWB_OFFSET_48K_LONG: [usize; 50] = [
      0,   4,   8,  12,  16,  20,  24,  28,  32,  36,  40,  48,  56,  64,  72,  80,
     88,  96, 108, 120, 132, 144, 160, 176, 196, 216, 240, 264, 292, 320, 352, 384,
    416, 448, 480, 512, 544, 576, 608, 640, 672, 704, 736, 768, 800, 832, 864, 896,
    928, 1024,
];
#[rustfmt::skip]
const SWB_OFFSET_48K_SHORT: [usize; 15] = [
    0, 4, 8, 12, 16, 20, 28, 36, 44, 56, 68, 80, 96, 112, 128,
];
#[rustfmt::skip]
const SWB_OFFSET_32K_LONG: [usize; 52] = [
      0,   4,   8,  12,  16,  20,  24,  28,  32,  36,  40,  48,  56,  64,  72,  80,
     88,  96, 108, 120, 132, 144, 160, 176, 196, 216, 240, 264, 292, 320, 352, 384,
    416, 448, 480, 512, 544, 576, 608, 640, 672, 704, 736, 768, 800, 832, 864, 896,
    928, 960, 992, 1024,
];
#[rustfmt::skip]
const SWB_OFFSET_8K_LONG: [usize; 41] = [
      0,  12,  24,  36,  48,  60,  72,  84,  96, 108, 120, 132, 144, 156, 172, 188,
    204, 220, 236, 252, 268, 288, 308, 328, 348, 372, 396, 420, 448, 476, 508, 544,
    580, 620, 664, 712, 764, 820, 880, 944, 1024,
];
#[rustfmt::skip]
const SWB_OFFSET_8K_SHORT: [usize; 16] = [
    0, 4, 8, 12, 16, 20, 24, 28, 36, 44, 52, 60, 72, 88, 108, 128,
];
#[rustfmt::skip]
const SWB_OFFSET_16K_LONG: [usize; 44] = [
      0,   8,  16,  24,  32,  40,  48,  56,  64,  72,  80,  88, 100, 112, 124, 136,
    148, 160, 172, 184, 196, 212, 228, 244, 260, 280, 300, 320, 344, 368, 396, 424,
    456, 492, 532, 572, 616, 664, 716, 772, 832, 896, 960, 1024,
];
#[rustfmt::skip]
const SWB_OFFSET_16K_SHORT: [usize; 16] = [
    0, 4, 8, 12, 16, 20, 24, 28, 32, 40, 48, 60, 72, 88, 108, 128,
];
#[rustfmt::skip]
const SWB_OFFSET_24K_LONG: [usize; 48] = [
      0,   4,   8,  12,  16,  20,  24,  28,  32,  36,  40,  44,  52,  60,  68,  76,
     84,  92, 100, 108, 116, 124, 136, 148, 160, 172, 188, 204, 220, 240, 260, 284,
    308, 336, 364, 396, 432, 468, 508, 552, 600, 652, 704, 768, 832, 896, 960, 1024,
];
#[rustfmt::skip]
const SWB_OFFSET_24K_SHORT: [usize; 16] = [
    0, 4, 8, 12, 16, 20, 24, 28, 36, 44, 52, 64, 76, 92, 108, 128,
];
#[rustfmt::skip]
const SWB_OFFSET_64K_LONG: [usize; 48] = [
      0,   4,   8,  12,  16,  20,  24,  28,  32,  36,  40,  44,  48,  52,  56,  64,
     72,  80,  88, 100, 112, 124, 140, 156, 172, 192, 216, 240, 268, 304, 344, 384,
    424, 464, 504, 544, 584, 624, 664, 704, 744, 784, 824, 864, 904, 944, 984, 1024,
];
#[rustfmt::skip]
const SWB_OFFSET_64K_SHORT: [usize; 13] = [
    0, 4, 8, 12, 16, 20, 24, 32, 40, 48, 64, 92, 128,
];
#[rustfmt::skip]
const SWB_OFFSET_96K_LONG: [usize; 42] = [
      0,   4,   8,  12,  16,  20,  24,  28,  32,  36,  40,  44,  48,  52,  56,  64,
     72,  80,  88,  96, 108, 120, 132, 144, 156, 172, 188, 212, 240, 276, 320, 384,
    448, 512, 576, 640, 704, 768, 832, 896, 960, 1024,
];

/// 每个采样率索引的 (长窗, 短窗) 边界表 (1024 点帧)
const SWB_OFFSETS_1024: [(&[usize], &[usize]); 13] = [
    (&SWB_OFFSET_96K_LONG, &SWB_OFFSET_64K_SHORT),
    (&SWB_OFFSET_96K_LONG, &SWB_OFFSET_64K_SHORT),
    (&SWB_OFFSET_64K_LONG, &SWB_OFFSET_64K_SHORT),
    (&SWB_OFFSET_48K_LONG, &SWB_OFFSET_48K_SHORT),
    (&SWB_OFFSET_48K_LONG, &SWB_OFFSET_48K_SHORT),
    (&SWB_OFFSET_32K_LONG, &SWB_OFFSET_48K_SHORT),
    (&SWB_OFFSET_24K_LONG, &SWB_OFFSET_24K_SHORT),
    (&SWB_OFFSET_24K_LONG, &SWB_OFFSET_24K_SHORT),
    (&SWB_OFFSET_16K_LONG, &SWB_OFFSET_16K_SHORT),
    (&SWB_OFFSET_16K_LONG, &SWB_OFFSET_16K_SHORT),
    (&SWB_OFFSET_16K_LONG, &SWB_OFFSET_16K_SHORT),
    (&SWB_OFFSET_8K_LONG, &SWB_OFFSET_8K_SHORT),
    (&SWB_OFFSET_8K_LONG, &SWB_OFFSET_8K_SHORT),
];

type SwbPair = (Vec<usize>, Vec<usize>);

/// 960 点帧的边界表: 由 1024 点表截断得到
fn swb_offsets_960() -> &'static [SwbPair] {
    static TABLE: OnceLock<Vec<SwbPair>> = OnceLock::new();
    TABLE.get_or_init(|| {
        SWB_OFFSETS_1024
            .iter()
            .map(|&(long, short)| (truncate_offsets(long, 960), truncate_offsets(short, 120)))
            .collect()
    })
}

fn truncate_offsets(offsets: &[usize], limit: usize) -> Vec<usize> {
    let mut out: Vec<usize> = offsets.iter().copied().filter(|&o| o < limit).collect();
    out.push(limit);
    out
}

/// 获取 scalefactor band 边界表
///
/// 返回的切片长度为 band 数 + 1, 最后一项为窗口长度.
pub fn swb_offsets(
    sample_rate_index: u8,
    frame_length: FrameLength,
    is_short: bool,
) -> MusiqueResult<&'static [usize]> {
    let idx = sample_rate_index as usize;
    if idx >= SWB_OFFSETS_1024.len() {
        return Err(MusiqueError::InvalidArgument(format!(
            "AAC: 保留的采样率索引 {}",
            sample_rate_index
        )));
    }
    let table = match frame_length {
        FrameLength::Samples1024 => {
            let (long, short) = SWB_OFFSETS_1024[idx];
            if is_short { short } else { long }
        }
        FrameLength::Samples960 => {
            let (long, short) = &swb_offsets_960()[idx];
            if is_short { short.as_slice() } else { long.as_slice() }
        }
    };
    Ok(table)
}

/// TNS 可用频带上限
pub fn tns_max_bands(sample_rate_index: u8, is_short: bool) -> usize {
    let idx = (sample_rate_index as usize).min(TNS_MAX_BANDS_LONG.len() - 1);
    if is_short {
        TNS_MAX_BANDS_SHORT[idx]
    } else {
        TNS_MAX_BANDS_LONG[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_边界表单调且以窗口长度结束() {
        for sr in 0..13u8 {
            for (fl, long_len, short_len) in [
                (FrameLength::Samples1024, 1024, 128),
                (FrameLength::Samples960, 960, 120),
            ] {
                let long = swb_offsets(sr, fl, false).unwrap();
                let short = swb_offsets(sr, fl, true).unwrap();
                assert_eq!(long[0], 0);
                assert_eq!(*long.last().unwrap(), long_len);
                assert_eq!(*short.last().unwrap(), short_len);
                assert!(long.windows(2).all(|w| w[0] < w[1]));
                assert!(short.windows(2).all(|w| w[0] < w[1]));
                assert!(long.len() - 1 <= MAX_SWB);
            }
        }
    }

    #[test]
    fn test_band_数() {
        let fl = FrameLength::Samples1024;
        assert_eq!(swb_offsets(4, fl, false).unwrap().len() - 1, 49);
        assert_eq!(swb_offsets(5, fl, false).unwrap().len() - 1, 51);
        assert_eq!(swb_offsets(4, fl, true).unwrap().len() - 1, 14);
        assert_eq!(swb_offsets(11, fl, false).unwrap().len() - 1, 40);
        assert_eq!(swb_offsets(3, FrameLength::Samples960, false).unwrap().len() - 1, 49);
        assert_eq!(swb_offsets(3, FrameLength::Samples960, true).unwrap().len() - 1, 14);
    }

    #[test]
    fn test_保留采样率索引() {
        assert!(matches!(
            swb_offsets(13, FrameLength::Samples1024, false),
            Err(MusiqueError::InvalidArgument(_))
        ));
    }
}
