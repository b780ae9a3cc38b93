//! 反量化: 量化频谱线 → 浮点频谱 (ISO 14496-3, 4.6.1).
//!
//! `x = sign(q) * |q|^(4/3) * 2^(0.25 * (sf - 100))`

use std::sync::OnceLock;

use log::trace;
use musique_core::{MusiqueError, MusiqueResult};

use super::ics::{IcsInfo, ScaleFactorGrid};

/// scale factor 偏移: sf=100 时增益为 1
pub const SF_OFFSET: i32 = 100;

const GAIN_TABLE_SIZE: usize = 256;
const POW43_TABLE_SIZE: usize = 8192;

static GAIN_TABLE: OnceLock<[f32; GAIN_TABLE_SIZE]> = OnceLock::new();
static POW43_TABLE: OnceLock<Vec<f32>> = OnceLock::new();

fn gain_table() -> &'static [f32; GAIN_TABLE_SIZE] {
    GAIN_TABLE.get_or_init(|| {
        let mut table = [0.0f32; GAIN_TABLE_SIZE];
        for (sf, g) in table.iter_mut().enumerate() {
            *g = 2.0f64.powf(0.25 * (sf as i32 - SF_OFFSET) as f64) as f32;
        }
        table
    })
}

fn pow43_table() -> &'static Vec<f32> {
    POW43_TABLE.get_or_init(|| {
        (0..POW43_TABLE_SIZE)
            .map(|i| (i as f64).powf(4.0 / 3.0) as f32)
            .collect()
    })
}

fn lookup_gain(table: &[f32; GAIN_TABLE_SIZE], sf: i32) -> f32 {
    match usize::try_from(sf) {
        Ok(idx) if idx < GAIN_TABLE_SIZE => table[idx],
        _ => {
            trace!("AAC: scale factor {} 越界, band 静音", sf);
            0.0
        }
    }
}

#[inline]
fn lookup_inv_quant(pow43: &[f32], q: i32) -> f32 {
    let abs = q.unsigned_abs() as usize;
    let mag = match pow43.get(abs) {
        Some(&mag) => mag,
        None => (abs as f64).powf(4.0 / 3.0) as f32,
    };
    if q < 0 { -mag } else { mag }
}

/// band 增益 `2^(0.25 * (sf - 100))`, sf 不在 0..=255 时为 0 (静音)
pub fn compute_gain(sf: i32) -> f32 {
    lookup_gain(gain_table(), sf)
}

/// `sign(q) * |q|^(4/3)`
pub fn compute_inv_quant(q: i32) -> f32 {
    lookup_inv_quant(pow43_table(), q)
}

/// 反量化器
///
/// 只引用共享的只读表, 每个解码器实例持有一个.
#[derive(Debug, Clone, Copy)]
pub struct InverseQuantizer {
    gain: &'static [f32; GAIN_TABLE_SIZE],
    pow43: &'static [f32],
}

impl Default for InverseQuantizer {
    fn default() -> Self {
        Self::new()
    }
}

impl InverseQuantizer {
    pub fn new() -> Self {
        Self {
            gain: gain_table(),
            pow43: pow43_table(),
        }
    }

    /// 按 窗口组 → 窗口 → band 的顺序反量化
    ///
    /// `max_sfb` 之外的频谱线输出为 0.
    pub fn process(
        &self,
        info: &IcsInfo,
        quantized: &[i32],
        scale_factors: &ScaleFactorGrid,
        out: &mut [f32],
    ) -> MusiqueResult<()> {
        let frame_len = info.frame_len();
        if quantized.len() < frame_len || out.len() < frame_len {
            return Err(MusiqueError::InvalidArgument(format!(
                "反量化缓冲区长度不足: quantized={}, out={}, 帧长={}",
                quantized.len(),
                out.len(),
                frame_len
            )));
        }
        out[..frame_len].iter_mut().for_each(|x| *x = 0.0);

        for group in 0..info.num_window_groups {
            for win in info.group_windows(group) {
                let base = win * info.window_len;
                for sfb in 0..info.max_sfb {
                    let gain = self.band_gain(scale_factors.get(group, sfb));
                    if gain == 0.0 {
                        continue;
                    }
                    let band = info.band_range(sfb);
                    let lines = base + band.start..base + band.end;
                    for (x, &q) in out[lines.clone()].iter_mut().zip(&quantized[lines]) {
                        *x = self.inv_quant(q) * gain;
                    }
                }
            }
        }
        Ok(())
    }

    fn band_gain(&self, sf: i32) -> f32 {
        lookup_gain(self.gain, sf)
    }

    #[inline]
    fn inv_quant(&self, q: i32) -> f32 {
        lookup_inv_quant(self.pow43, q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::aac::config::DecoderConfig;
    use musique_core::{BitReader, BitWriter};

    fn long_info(max_sfb: usize) -> IcsInfo {
        let mut bw = BitWriter::new();
        bw.write_bits(0, 4);
        bw.write_bits(max_sfb as u32, 6);
        bw.write_bits(0, 1);
        let data = bw.finish();
        IcsInfo::parse(&mut BitReader::new(&data), &DecoderConfig::default()).unwrap()
    }

    #[test]
    fn test_gain_基准与单调() {
        assert_eq!(compute_gain(100), 1.0);
        assert!((compute_gain(104) - 2.0).abs() < 1e-6);
        for sf in 0..255 {
            assert!(compute_gain(sf + 1) > compute_gain(sf));
        }
    }

    #[test]
    fn test_gain_越界为零() {
        assert_eq!(compute_gain(-1), 0.0);
        assert_eq!(compute_gain(256), 0.0);
        assert_eq!(compute_gain(i32::MIN), 0.0);
    }

    #[test]
    fn test_inv_quant_符号与单调() {
        assert_eq!(compute_inv_quant(0), 0.0);
        assert_eq!(compute_inv_quant(1), 1.0);
        assert!((compute_inv_quant(8) - 16.0).abs() < 1e-4);
        assert!((compute_inv_quant(-8) + 16.0).abs() < 1e-4);
        let mut prev = 0.0f32;
        for q in 1..9000 {
            let pos = compute_inv_quant(q);
            let neg = compute_inv_quant(-q);
            assert!(pos > 0.0 && neg < 0.0);
            assert_eq!(pos, -neg);
            assert!(pos > prev, "q={q}");
            prev = pos;
        }
    }

    #[test]
    fn test_process_band_增益() {
        let info = long_info(2);
        let mut grid = ScaleFactorGrid::new(1, 2).unwrap();
        grid.set(0, 0, 100);
        grid.set(0, 1, 108);
        let mut q = vec![0i32; 1024];
        q[0] = 1;
        q[1] = -8;
        q[4] = 1;
        q[8] = 5; // max_sfb 之外
        let mut out = vec![9.0f32; 1024];
        InverseQuantizer::new().process(&info, &q, &grid, &mut out).unwrap();
        assert_eq!(out[0], 1.0);
        assert!((out[1] + 16.0).abs() < 1e-4);
        assert!((out[4] - 4.0).abs() < 1e-5);
        assert_eq!(out[8], 0.0);
    }

    #[test]
    fn test_process_max_sfb_为零静音() {
        let info = long_info(0);
        let grid = ScaleFactorGrid::new(1, 0).unwrap();
        let q = vec![3i32; 1024];
        let mut out = vec![1.0f32; 1024];
        InverseQuantizer::new().process(&info, &q, &grid, &mut out).unwrap();
        assert!(out.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_process_越界_scale_factor_静音() {
        let info = long_info(1);
        let mut grid = ScaleFactorGrid::new(1, 1).unwrap();
        grid.set(0, 0, 300);
        let q = vec![3i32; 1024];
        let mut out = vec![0.0f32; 1024];
        InverseQuantizer::new().process(&info, &q, &grid, &mut out).unwrap();
        assert!(out[..4].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_process_短窗按组取增益() {
        // grouping 0b1011000: 组 [0,1] [2,3,4] [5] [6] [7]
        let mut bw = BitWriter::new();
        bw.write_bits(0, 1);
        bw.write_bits(2, 2);
        bw.write_bits(0, 1);
        bw.write_bits(2, 4);
        bw.write_bits(0b1011000, 7);
        let data = bw.finish();
        let info = IcsInfo::parse(&mut BitReader::new(&data), &DecoderConfig::default()).unwrap();

        let mut grid = ScaleFactorGrid::new(5, 2).unwrap();
        for g in 0..5 {
            for sfb in 0..2 {
                grid.set(g, sfb, 100);
            }
        }
        grid.set(1, 0, 104);
        grid.set(2, 1, 108);

        let mut q = vec![0i32; 1024];
        q[0] = 1; // 窗口 0, 组 0
        q[256] = 1; // 窗口 2, 组 1
        q[385] = 1; // 窗口 3, 组 1, band 0
        q[388] = 1; // 窗口 3, 组 1, band 1
        q[392] = 3; // 窗口 3, max_sfb 之外
        q[512] = 1; // 窗口 4, 组 1
        q[640] = 1; // 窗口 5, 组 2, band 0
        q[645] = 8; // 窗口 5, 组 2, band 1
        q[896] = -1; // 窗口 7, 组 4
        let mut out = vec![9.0f32; 1024];
        InverseQuantizer::new().process(&info, &q, &grid, &mut out).unwrap();

        let mut expected = vec![0.0f32; 1024];
        expected[0] = 1.0;
        expected[256] = 2.0;
        expected[385] = 2.0;
        expected[388] = 1.0;
        expected[512] = 2.0;
        expected[640] = 1.0;
        expected[645] = 64.0;
        expected[896] = -1.0;
        for (i, (got, want)) in out.iter().zip(&expected).enumerate() {
            assert!((got - want).abs() < 1e-4, "线 {i}: {got} != {want}");
        }
    }

    #[test]
    fn test_process_与单值函数一致() {
        let info = long_info(3);
        let mut grid = ScaleFactorGrid::new(1, 3).unwrap();
        grid.set(0, 0, 37);
        grid.set(0, 1, -5);
        grid.set(0, 2, 255);
        let mut q = vec![0i32; 1024];
        q[..12].copy_from_slice(&[1, -2, 8191, -8192, 3, 9000, -1, 0, 20000, -8193, 17, 2]);
        let mut out = vec![0.0f32; 1024];
        InverseQuantizer::new().process(&info, &q, &grid, &mut out).unwrap();
        for sfb in 0..3 {
            let gain = compute_gain(grid.get(0, sfb));
            for line in info.band_range(sfb) {
                assert_eq!(out[line], compute_inv_quant(q[line]) * gain, "线 {line}");
            }
        }
    }
}
