//! 时域噪声整形 (TNS): tns_data 解析与频域全极点滤波 (ISO 14496-3, 4.6.9).

use std::f32::consts::FRAC_PI_2;

use musique_core::bitreader::BitReader;
use musique_core::{MusiqueError, MusiqueResult};

use super::config::{AacProfile, DecoderConfig};
use super::ics::IcsInfo;
use super::tables;

/// 滤波器阶数上限 (Main 长窗)
pub const TNS_MAX_ORDER: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TnsFilter {
    /// 覆盖的 band 数 (从上一个滤波器的下边界往下数)
    pub length: usize,
    pub order: usize,
    /// true: 从高频向低频滤波
    pub direction: bool,
    pub coef: [f32; TNS_MAX_ORDER],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TnsData {
    /// `filters[window]`
    pub filters: Vec<Vec<TnsFilter>>,
}

impl TnsData {
    /// 解析 tns_data
    pub fn parse(br: &mut BitReader, info: &IcsInfo, config: &DecoderConfig) -> MusiqueResult<Self> {
        let is_short = info.is_eight_short();
        let max_order = if is_short {
            7
        } else if config.profile == AacProfile::Main {
            20
        } else {
            12
        };
        let (n_filt_bits, length_bits, order_bits) = if is_short { (1, 4, 3) } else { (2, 6, 5) };

        let mut filters = Vec::with_capacity(info.num_windows);
        for w in 0..info.num_windows {
            let n_filt = br.read_bits(n_filt_bits)? as usize;
            let mut window = Vec::with_capacity(n_filt);
            if n_filt == 0 {
                filters.push(window);
                continue;
            }

            let coef_res_bits = br.read_bits(1)? + 3;
            for filt in 0..n_filt {
                let length = br.read_bits(length_bits)? as usize;
                let order = br.read_bits(order_bits)? as usize;
                if order > max_order {
                    return Err(MusiqueError::InvalidData(format!(
                        "AAC TNS 非法: window={}, filter={}, order={} 超出上限={}",
                        w, filt, order, max_order
                    )));
                }
                let mut filter = TnsFilter {
                    length,
                    order,
                    direction: false,
                    coef: [0.0; TNS_MAX_ORDER],
                };
                if order > 0 {
                    filter.direction = br.read_bool()?;
                    let coef_compress = br.read_bits(1)?;
                    let coef_bits = coef_res_bits - coef_compress;
                    for c in filter.coef.iter_mut().take(order) {
                        let raw = br.read_bits(coef_bits)?;
                        *c = dequantize_coef(raw, coef_bits, coef_res_bits);
                    }
                }
                window.push(filter);
            }
            filters.push(window);
        }
        Ok(Self { filters })
    }

    /// 在频谱上应用 TNS 全极点滤波
    pub fn apply(&self, spectrum: &mut [f32], info: &IcsInfo, sample_rate_index: u8) {
        let max_bands = tables::tns_max_bands(sample_rate_index, info.is_eight_short())
            .min(info.max_sfb)
            .min(info.num_swb);
        if max_bands == 0 {
            return;
        }

        for (w, window) in self.filters.iter().enumerate() {
            let base = w * info.window_len;
            let mut bottom = info.num_swb;
            for filter in window {
                let top = bottom;
                bottom = top.saturating_sub(filter.length);
                if filter.order == 0 {
                    continue;
                }
                let start = info.swb_offsets[bottom.min(max_bands)];
                let end = info.swb_offsets[top.min(max_bands)];
                if end <= start {
                    continue;
                }
                let lpc = compute_lpc(&filter.coef[..filter.order]);
                filter_band(
                    &mut spectrum[base + start..base + end],
                    &lpc[..filter.order],
                    filter.direction,
                );
            }
        }
    }
}

/// 反量化 TNS 反射系数: 符号扩展后按 `sin(q / iqfac)` 还原
fn dequantize_coef(raw: u32, coef_bits: u32, coef_res_bits: u32) -> f32 {
    let shift = 32 - coef_bits;
    let q = ((raw << shift) as i32) >> shift;
    let half = (1u32 << (coef_res_bits - 1)) as f32;
    let iqfac = if q >= 0 { (half - 0.5) / FRAC_PI_2 } else { (half + 0.5) / FRAC_PI_2 };
    (q as f32 / iqfac).sin()
}

/// 将反射系数转换为 LPC 系数
fn compute_lpc(coefs: &[f32]) -> [f32; TNS_MAX_ORDER] {
    let mut lpc = [0.0f32; TNS_MAX_ORDER];
    if coefs.is_empty() {
        return lpc;
    }
    lpc[0] = coefs[0];
    for i in 1..coefs.len() {
        let r = coefs[i];
        for j in 0..(i / 2) {
            let tmp = r * lpc[j];
            lpc[j] += r * lpc[i - 1 - j];
            lpc[i - 1 - j] += tmp;
        }
        if i % 2 != 0 {
            let j = i / 2;
            lpc[j] += r * lpc[j];
        }
        lpc[i] = r;
    }
    lpc
}

/// 全极点滤波: `y[n] = x[n] - Σ lpc[i] * y[n - 1 - i]`
fn filter_band(band: &mut [f32], lpc: &[f32], reverse: bool) {
    let len = band.len();
    for m in 0..len {
        let idx = if reverse { len - 1 - m } else { m };
        let mut acc = band[idx];
        for (i, &a) in lpc.iter().enumerate().take(m) {
            let src = if reverse { idx + 1 + i } else { idx - 1 - i };
            acc -= band[src] * a;
        }
        band[idx] = acc;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use musique_core::BitWriter;

    fn long_info(max_sfb: usize) -> IcsInfo {
        let mut bw = BitWriter::new();
        bw.write_bits(0, 4);
        bw.write_bits(max_sfb as u32, 6);
        bw.write_bits(0, 1);
        let data = bw.finish();
        IcsInfo::parse(&mut BitReader::new(&data), &DecoderConfig::default()).unwrap()
    }

    #[test]
    fn test_系数反量化() {
        // 4 位分辨率: q=0 → 0, q=7 → sin(7 / (7.5 / (π/2)))
        assert_eq!(dequantize_coef(0, 4, 4), 0.0);
        let expected = (7.0f32 / (7.5 / FRAC_PI_2)).sin();
        assert!((dequantize_coef(7, 4, 4) - expected).abs() < 1e-6);
        // 3 位压缩: 0b100 = -4 → sin(-4 / (8.5 / (π/2)))
        let expected = (-4.0f32 / (8.5 / FRAC_PI_2)).sin();
        assert!((dequantize_coef(0b100, 3, 4) - expected).abs() < 1e-6);
        assert!(dequantize_coef(0b111, 3, 3) < 0.0);
    }

    #[test]
    fn test_parse_长窗() {
        let info = long_info(20);
        let mut bw = BitWriter::new();
        bw.write_bits(1, 2); // n_filt
        bw.write_bits(1, 1); // coef_res → 4 位
        bw.write_bits(10, 6); // length
        bw.write_bits(2, 5); // order
        bw.write_bits(1, 1); // direction
        bw.write_bits(0, 1); // coef_compress
        bw.write_bits(3, 4);
        bw.write_bits(0b1100, 4);
        let data = bw.finish();
        let mut br = BitReader::new(&data);
        let tns = TnsData::parse(&mut br, &info, &DecoderConfig::default()).unwrap();
        assert_eq!(tns.filters.len(), 1);
        let f = &tns.filters[0][0];
        assert_eq!((f.length, f.order, f.direction), (10, 2, true));
        assert!(f.coef[0] > 0.0 && f.coef[1] < 0.0);
        assert_eq!(br.bits_read(), 2 + 1 + 6 + 5 + 1 + 1 + 8);
    }

    #[test]
    fn test_阶数超限() {
        let info = long_info(20);
        let mut bw = BitWriter::new();
        bw.write_bits(1, 2);
        bw.write_bits(0, 1);
        bw.write_bits(10, 6);
        bw.write_bits(13, 5);
        let data = bw.finish();
        let err = TnsData::parse(&mut BitReader::new(&data), &info, &DecoderConfig::default());
        assert!(matches!(err, Err(MusiqueError::InvalidData(_))));
    }

    #[test]
    fn test_一阶滤波() {
        // lpc = [r], y[n] = x[n] - r * y[n-1]
        let mut band = [1.0f32, 0.0, 0.0, 0.0];
        filter_band(&mut band, &[0.5], false);
        assert_eq!(band, [1.0, -0.5, 0.25, -0.125]);

        let mut band = [0.0f32, 0.0, 0.0, 1.0];
        filter_band(&mut band, &[0.5], true);
        assert_eq!(band, [-0.125, 0.25, -0.5, 1.0]);
    }

    #[test]
    fn test_lpc_转换() {
        let lpc = compute_lpc(&[0.5, 0.25]);
        // a1 = k1 + k2 * k1, a2 = k2
        assert!((lpc[0] - 0.625).abs() < 1e-6);
        assert!((lpc[1] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_apply_限制在_max_sfb_内() {
        let info = long_info(2);
        let mut coef = [0.0f32; TNS_MAX_ORDER];
        coef[0] = 0.5;
        let tns = TnsData {
            filters: vec![vec![TnsFilter {
                length: 49,
                order: 1,
                direction: false,
                coef,
            }]],
        };
        let mut spec = vec![0.0f32; 1024];
        spec[0] = 1.0;
        spec[8] = 1.0;
        tns.apply(&mut spec, &info, 4);
        assert_eq!(spec[1], -0.5);
        assert_eq!(spec[7], (-0.5f32).powi(7));
        // band 2 及以上不受影响
        assert_eq!(spec[8], 1.0);
        assert_eq!(spec[9], 0.0);
    }
}
