//! 立体声工具与感知噪声替代 (PNS).
//!
//! 作用在反量化后的浮点频谱上, 顺序为 PNS → M/S → 强度立体声.

use log::trace;
use musique_core::bitreader::BitReader;
use musique_core::MusiqueResult;

use super::ics::{BandType, IcsInfo, ScaleFactorGrid, SectionData};

/// ms_mask_present 与每个 (窗口组, band) 的 ms_used 标志
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MsMask {
    /// 0: 不使用, 1: 按 band 标志, 2: 全部使用
    pub present: u8,
    max_sfb: usize,
    used: Vec<bool>,
}

impl MsMask {
    /// 解析 ms_mask_present 及 ms_used (CPE 共享窗口时)
    pub fn parse(br: &mut BitReader, info: &IcsInfo) -> MusiqueResult<Self> {
        let present = br.read_bits(2)? as u8;
        let bands = info.num_window_groups * info.max_sfb;
        let used = match present {
            1 => {
                let mut used = Vec::with_capacity(bands);
                for _ in 0..bands {
                    used.push(br.read_bool()?);
                }
                used
            }
            2 => vec![true; bands],
            _ => vec![false; bands],
        };
        Ok(Self {
            present,
            max_sfb: info.max_sfb,
            used,
        })
    }

    pub fn is_used(&self, group: usize, sfb: usize) -> bool {
        self.used
            .get(group * self.max_sfb + sfb)
            .copied()
            .unwrap_or(false)
    }

    /// 强度立体声是否反相: 仅 ms_mask_present == 1 时由 ms_used 决定
    fn inverts_intensity(&self, group: usize, sfb: usize) -> bool {
        self.present == 1 && self.is_used(group, sfb)
    }
}

/// 对 band 所在的每个窗口执行 `f(频谱线范围)`
fn for_each_window(info: &IcsInfo, group: usize, sfb: usize, mut f: impl FnMut(std::ops::Range<usize>)) {
    let band = info.band_range(sfb);
    for win in info.group_windows(group) {
        let base = win * info.window_len;
        f(base + band.start..base + band.end);
    }
}

/// M/S 反变换: L = M + S, R = M - S
///
/// 任一声道为噪声或强度立体声的 band 不做处理.
pub fn apply_ms_stereo(
    left: &mut [f32],
    right: &mut [f32],
    info: &IcsInfo,
    mask: &MsMask,
    left_sections: &SectionData,
    right_sections: &SectionData,
) {
    if mask.present == 0 {
        return;
    }
    for group in 0..info.num_window_groups {
        for sfb in 0..info.max_sfb {
            if !mask.is_used(group, sfb) {
                continue;
            }
            let lt = left_sections.band_type(group, sfb);
            let rt = right_sections.band_type(group, sfb);
            if matches!(lt, BandType::Noise | BandType::Intensity { .. })
                || matches!(rt, BandType::Noise | BandType::Intensity { .. })
            {
                continue;
            }
            for_each_window(info, group, sfb, |lines| {
                for idx in lines {
                    let m = left[idx];
                    let s = right[idx];
                    left[idx] = m + s;
                    right[idx] = m - s;
                }
            });
        }
    }
}

/// 强度立体声: R = L * sign * 0.5^(0.25 * is_position)
pub fn apply_intensity_stereo(
    left: &[f32],
    right: &mut [f32],
    info: &IcsInfo,
    right_sections: &SectionData,
    right_scale_factors: &ScaleFactorGrid,
    mask: &MsMask,
) {
    for group in 0..info.num_window_groups {
        for sfb in 0..info.max_sfb {
            let BandType::Intensity { in_phase } = right_sections.band_type(group, sfb) else {
                continue;
            };
            let mut sign = if in_phase { 1.0f32 } else { -1.0f32 };
            if mask.inverts_intensity(group, sfb) {
                sign = -sign;
            }
            let is_position = right_scale_factors.get(group, sfb);
            let scale = sign * 0.5f32.powf(0.25 * is_position as f32);
            for_each_window(info, group, sfb, |lines| {
                for idx in lines {
                    right[idx] = left[idx] * scale;
                }
            });
        }
    }
}

/// PNS 噪声源 (线性同余发生器)
#[derive(Debug, Clone)]
pub struct NoiseGenerator {
    state: u32,
}

impl Default for NoiseGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl NoiseGenerator {
    pub const SEED: u32 = 0x1F2E_3D4C;

    pub fn new() -> Self {
        Self { state: Self::SEED }
    }

    pub fn reset(&mut self) {
        self.state = Self::SEED;
    }

    pub fn next_sample(&mut self) -> f32 {
        self.state = self
            .state
            .wrapping_mul(1_664_525)
            .wrapping_add(1_013_904_223);
        (self.state as i32) as f32
    }
}

/// 用噪声填充噪声 band, 每个窗口的 band 能量归一化为 `2^(0.25 * sf)`
pub fn apply_pns(
    spectrum: &mut [f32],
    info: &IcsInfo,
    sections: &SectionData,
    scale_factors: &ScaleFactorGrid,
    noise: &mut NoiseGenerator,
) {
    for group in 0..info.num_window_groups {
        for sfb in 0..info.max_sfb {
            if sections.band_type(group, sfb) != BandType::Noise {
                continue;
            }
            let sf = scale_factors.get(group, sfb);
            let target = 2.0f32.powf(0.25 * sf as f32);
            trace!("AAC PNS: group={}, sfb={}, sf={}", group, sfb, sf);
            for_each_window(info, group, sfb, |lines| {
                let band = &mut spectrum[lines];
                let mut energy = 0.0f32;
                for x in band.iter_mut() {
                    *x = noise.next_sample();
                    energy += *x * *x;
                }
                if energy > 0.0 {
                    let scale = target / energy.sqrt();
                    band.iter_mut().for_each(|x| *x *= scale);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::aac::config::DecoderConfig;
    use musique_core::BitWriter;

    fn layout(codebooks: &[(u8, u32)]) -> (IcsInfo, SectionData) {
        let max_sfb: u32 = codebooks.iter().map(|&(_, len)| len).sum();
        let mut bw = BitWriter::new();
        bw.write_bits(0, 4);
        bw.write_bits(max_sfb, 6);
        bw.write_bits(0, 1);
        for &(cb, len) in codebooks {
            bw.write_bits(u32::from(cb), 4);
            bw.write_bits(len, 5);
        }
        let data = bw.finish();
        let mut br = BitReader::new(&data);
        let info = IcsInfo::parse(&mut br, &DecoderConfig::default()).unwrap();
        let sections = SectionData::parse(&mut br, &info, false).unwrap();
        (info, sections)
    }

    fn full_mask(info: &IcsInfo) -> MsMask {
        let data = [0b1000_0000u8];
        MsMask::parse(&mut BitReader::new(&data), info).unwrap()
    }

    #[test]
    fn test_ms_stereo() {
        let (info, sections) = layout(&[(1, 1), (13, 1)]);
        let mask = full_mask(&info);
        assert_eq!(mask.present, 2);
        let mut left = vec![0.0f32; 1024];
        let mut right = vec![0.0f32; 1024];
        left[0] = 3.0;
        right[0] = 1.0;
        left[4] = 3.0;
        right[4] = 1.0;
        apply_ms_stereo(&mut left, &mut right, &info, &mask, &sections, &sections);
        assert_eq!((left[0], right[0]), (4.0, 2.0));
        // 噪声 band 不参与
        assert_eq!((left[4], right[4]), (3.0, 1.0));
    }

    #[test]
    fn test_ms_mask_按band() {
        let (info, _) = layout(&[(1, 3)]);
        let data = [0b0110_1000u8];
        let mask = MsMask::parse(&mut BitReader::new(&data), &info).unwrap();
        assert_eq!(mask.present, 1);
        assert!(mask.is_used(0, 0));
        assert!(!mask.is_used(0, 1));
        assert!(mask.is_used(0, 2));
    }

    #[test]
    fn test_intensity_stereo() {
        let (info, sections) = layout(&[(15, 1), (14, 1)]);
        let mut grid = ScaleFactorGrid::new(1, 2).unwrap();
        grid.set(0, 0, 4);
        grid.set(0, 1, 0);
        let mut left = vec![0.0f32; 1024];
        left[0] = 2.0;
        left[4] = 2.0;
        let mut right = vec![9.0f32; 1024];
        apply_intensity_stereo(&left, &mut right, &info, &sections, &grid, &MsMask::default());
        assert!((right[0] - 1.0).abs() < 1e-6);
        assert!((right[4] + 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_pns_能量() {
        let (info, sections) = layout(&[(13, 2)]);
        let mut grid = ScaleFactorGrid::new(1, 2).unwrap();
        grid.set(0, 0, 8);
        grid.set(0, 1, 0);
        let mut spec = vec![0.0f32; 1024];
        let mut noise = NoiseGenerator::new();
        apply_pns(&mut spec, &info, &sections, &grid, &mut noise);
        let e0: f32 = spec[0..4].iter().map(|x| x * x).sum();
        let e1: f32 = spec[4..8].iter().map(|x| x * x).sum();
        assert!((e0.sqrt() - 4.0).abs() < 1e-3);
        assert!((e1.sqrt() - 1.0).abs() < 1e-4);
        assert!(spec[8..].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_噪声源可复位() {
        let mut a = NoiseGenerator::new();
        let first: Vec<f32> = (0..4).map(|_| a.next_sample()).collect();
        a.reset();
        let again: Vec<f32> = (0..4).map(|_| a.next_sample()).collect();
        assert_eq!(first, again);
    }
}
