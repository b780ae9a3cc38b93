//! SSR 增益控制: gain_control_data 解析与 4 频带逆多相正交滤波器 (IPQF).
//!
//! IPQF 把 4 个子带信号合成为一个时域信号. 每步先把两条延迟线左移一格,
//! 再把 Q0/Q1 余弦调制后的部分和追加到末尾, 最后用原型滤波器的多相分量
//! T0/T1 对延迟线做点积, 成对地输出 `out[n]` 与 `out[3 - n]`.
//!
//! 注意: 原型滤波器由 Blackman 窗 sinc 生成, 不是 ISO 14496-3 附录中的 96 阶系数表,
//! 因此合成结果与一致性测试码流不能逐位一致.

use std::sync::OnceLock;

use musique_core::bitreader::BitReader;
use musique_core::{MusiqueError, MusiqueResult};

use super::ics::WindowSequence;

/// 子带数
pub const BANDS: usize = 4;
/// 原型滤波器阶数
pub const NPQFTAPS: usize = 96;
/// 每条延迟线上每个多相分量的点积长度
const KK: usize = NPQFTAPS / (2 * BANDS);
/// 延迟线长度
const DELAY_LEN: usize = NPQFTAPS / BANDS;

// ============================================================
// gain_control_data
// ============================================================

/// 每种窗口序列的 [窗口数, 首窗使用 4 位 aloc, aloc 位数] (ISO 14496-3 Table 4.55)
const GAIN_MODE: [[u8; 3]; 4] = [
    [1, 0, 5], // ONLY_LONG_SEQUENCE
    [2, 1, 2], // LONG_START_SEQUENCE
    [8, 0, 2], // EIGHT_SHORT_SEQUENCE
    [2, 1, 5], // LONG_STOP_SEQUENCE
];

/// 一个增益调整点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GainAdjustment {
    /// 增益等级码
    pub alevcode: u8,
    /// 调整点位置
    pub aloc: u8,
}

/// gain_control_data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GainControlData {
    /// 使用增益控制的最高子带 (1-3)
    pub max_band: usize,
    /// `adjustments[band - 1][window]`
    pub adjustments: Vec<Vec<Vec<GainAdjustment>>>,
}

impl GainControlData {
    pub fn parse(br: &mut BitReader, window_sequence: WindowSequence) -> MusiqueResult<Self> {
        let mode = GAIN_MODE[window_sequence.index()];
        let max_band = br.read_bits(2)? as usize;
        let mut adjustments = Vec::with_capacity(max_band);
        for _band in 0..max_band {
            let mut windows = Vec::with_capacity(mode[0] as usize);
            for wd in 0..mode[0] as usize {
                let adjust_num = br.read_bits(3)? as usize;
                let aloc_bits = if wd == 0 && mode[1] != 0 {
                    4
                } else {
                    u32::from(mode[2])
                };
                let mut points = Vec::with_capacity(adjust_num);
                for _ in 0..adjust_num {
                    points.push(GainAdjustment {
                        alevcode: br.read_bits(4)? as u8,
                        aloc: br.read_bits(aloc_bits)? as u8,
                    });
                }
                windows.push(points);
            }
            adjustments.push(windows);
        }
        Ok(Self {
            max_band,
            adjustments,
        })
    }
}

// ============================================================
// IPQF 系数
// ============================================================

struct PqfCoefs {
    q0: [[f32; BANDS]; BANDS / 2],
    q1: [[f32; BANDS]; BANDS / 2],
    t0: [[f32; KK]; BANDS],
    t1: [[f32; KK]; BANDS],
}

static PQF_COEFS: OnceLock<PqfCoefs> = OnceLock::new();

/// 96 阶对称低通原型 (截止 π/8, Blackman 窗 sinc), 直流增益归一化为 1
fn prototype() -> [f64; NPQFTAPS] {
    let mut h = [0.0f64; NPQFTAPS];
    let center = (NPQFTAPS as f64 - 1.0) / 2.0;
    let cutoff = std::f64::consts::PI / (2 * BANDS) as f64;
    for (m, tap) in h.iter_mut().enumerate() {
        let x = m as f64 - center;
        let sinc = (cutoff * x).sin() / (std::f64::consts::PI * x);
        let phase = 2.0 * std::f64::consts::PI * m as f64 / (NPQFTAPS as f64 - 1.0);
        let window = 0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos();
        *tap = sinc * window;
    }
    let sum: f64 = h.iter().sum();
    h.iter_mut().for_each(|t| *t /= sum);
    h
}

fn pqf_coefs() -> &'static PqfCoefs {
    PQF_COEFS.get_or_init(|| {
        let pi = std::f64::consts::PI;
        let modulation = |band: usize, i: usize| {
            let arg = (2 * i + 1) as f64 * (2.0 * band as f64 + 1.0 - BANDS as f64) * pi
                / (4 * BANDS) as f64;
            (2.0 * arg.cos()) as f32
        };
        let mut coefs = PqfCoefs {
            q0: [[0.0; BANDS]; BANDS / 2],
            q1: [[0.0; BANDS]; BANDS / 2],
            t0: [[0.0; KK]; BANDS],
            t1: [[0.0; KK]; BANDS],
        };
        for n in 0..BANDS / 2 {
            for i in 0..BANDS {
                coefs.q0[n][i] = modulation(n, i);
                coefs.q1[n][i] = modulation(BANDS + n, i);
            }
        }

        let h = prototype();
        for n in 0..BANDS {
            for k in 0..KK {
                let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
                coefs.t0[n][k] = (sign * BANDS as f64 * h[2 * k * BANDS + n]) as f32;
                coefs.t1[n][k] = (sign * BANDS as f64 * h[(2 * k + 1) * BANDS + n]) as f32;
            }
        }
        coefs
    })
}

// ============================================================
// IPQF
// ============================================================

/// 逆多相正交滤波器, 延迟线跨帧保留
#[derive(Debug, Clone)]
pub struct Ipqf {
    tmp1: [[f32; DELAY_LEN]; BANDS / 2],
    tmp2: [[f32; DELAY_LEN]; BANDS / 2],
}

impl Default for Ipqf {
    fn default() -> Self {
        Self::new()
    }
}

impl Ipqf {
    pub fn new() -> Self {
        Self {
            tmp1: [[0.0; DELAY_LEN]; BANDS / 2],
            tmp2: [[0.0; DELAY_LEN]; BANDS / 2],
        }
    }

    /// 清空延迟线 (码流重新初始化时调用)
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// 延迟线是否全为 0
    pub fn is_silent(&self) -> bool {
        self.tmp1
            .iter()
            .chain(self.tmp2.iter())
            .all(|line| line.iter().all(|&x| x == 0.0))
    }

    /// 把 4 个子带 (每个 `frame_len / 4` 个样本) 合成为 `frame_len` 个输出样本
    pub fn process(
        &mut self,
        bands: [&[f32]; BANDS],
        frame_len: usize,
        out: &mut [f32],
    ) -> MusiqueResult<()> {
        let band_len = frame_len / BANDS;
        if frame_len % BANDS != 0
            || out.len() < frame_len
            || bands.iter().any(|b| b.len() < band_len)
        {
            return Err(MusiqueError::InvalidArgument(format!(
                "IPQF: 帧长 {} 与缓冲区不匹配 (输出 {}, 子带 {:?})",
                frame_len,
                out.len(),
                bands.map(<[f32]>::len)
            )));
        }

        let coefs = pqf_coefs();
        for i in 0..band_len {
            let input = [bands[0][i], bands[1][i], bands[2][i], bands[3][i]];
            let chunk = &mut out[i * BANDS..(i + 1) * BANDS];
            self.perform_synthesis(coefs, &input, chunk);
        }
        Ok(())
    }

    fn perform_synthesis(&mut self, coefs: &PqfCoefs, input: &[f32; BANDS], out: &mut [f32]) {
        for n in 0..BANDS / 2 {
            self.tmp1[n].copy_within(1.., 0);
            self.tmp2[n].copy_within(1.., 0);
        }

        for n in 0..BANDS / 2 {
            let mut acc = 0.0f32;
            for i in 0..BANDS {
                acc += coefs.q0[n][i] * input[i];
            }
            self.tmp1[n][2 * KK - 1] = acc;

            let mut acc = 0.0f32;
            for i in 0..BANDS {
                acc += coefs.q1[n][i] * input[i];
            }
            self.tmp2[n][2 * KK - 1] = acc;
        }

        for n in 0..BANDS / 2 {
            let tmp1 = &self.tmp1[n];
            let tmp2 = &self.tmp2[n];

            let mut acc = 0.0f32;
            for k in 0..KK {
                acc += coefs.t0[n][k] * tmp1[2 * KK - 1 - 2 * k];
            }
            for k in 0..KK {
                acc += coefs.t1[n][k] * tmp2[2 * KK - 2 - 2 * k];
            }
            out[n] = acc;

            let mirror = BANDS - 1 - n;
            let mut acc = 0.0f32;
            for k in 0..KK {
                acc += coefs.t0[mirror][k] * tmp1[2 * KK - 1 - 2 * k];
            }
            for k in 0..KK {
                acc -= coefs.t1[mirror][k] * tmp2[2 * KK - 2 - 2 * k];
            }
            out[mirror] = acc;
        }
    }
}
