//! 参数立体声 (PS) 旁路信息解码 (ISO 14496-3, 8.6.4).
//!
//! 包含 PS 头部, 包络划分, IID / ICC 参数以及扩展中的 IPD / OPD 参数的熵解码与差分还原.
//! 不包含混合滤波器组与立体声合成.
//!
//! 细量化 IID 的时间差分码表 (iid_mode 3..=5 且 dt 编码) 暂未收录, 遇到时返回 `Unsupported`.

use log::{debug, trace};
use musique_core::bitreader::BitReader;
use musique_core::{MusiqueError, MusiqueResult};

use super::huffman::CodebookTable;

/// 每帧最多的包络数
pub const MAX_ENVELOPES: usize = 5;
/// 每个包络最多的参数个数
pub const MAX_PARS: usize = 34;
/// 一帧的 QMF 时隙数
const NUM_QMF_SLOTS: usize = 32;

/// IID / ICC 参数个数, 按 mode % 3
const IID_ICC_PARS: [usize; 3] = [10, 20, 34];
/// IPD / OPD 参数个数, 按 iid_mode % 3
const IPD_OPD_PARS: [usize; 3] = [5, 11, 17];

// (码长, 码字), 下标即符号
#[rustfmt::skip]
const IID_DF: [(u8, u32); 29] = [
    (17, 0x1FFFB), (17, 0x1FFFC), (17, 0x1FFFD), (17, 0x1FFFA), (16, 0xFFFC), (15, 0x7FFC),
    (13, 0x1FFD), (10, 0x3FE), (9, 0x1FE), (7, 0x7E), (6, 0x3C), (5, 0x1D), (4, 0xD), (3, 0x5),
    (1, 0x0), (3, 0x4), (4, 0xC), (5, 0x1C), (6, 0x3D), (6, 0x3E), (8, 0xFE), (11, 0x7FE),
    (13, 0x1FFC), (14, 0x3FFC), (14, 0x3FFD), (15, 0x7FFD), (17, 0x1FFFE), (18, 0x3FFFE),
    (18, 0x3FFFF),
];
#[rustfmt::skip]
const IID_DT: [(u8, u32); 29] = [
    (19, 0x7FFF9), (19, 0x7FFFA), (19, 0x7FFFB), (20, 0xFFFF8), (20, 0xFFFF9), (20, 0xFFFFA),
    (17, 0x1FFFD), (15, 0x7FFE), (12, 0xFFE), (10, 0x3FE), (8, 0xFE), (6, 0x3E), (4, 0xE),
    (2, 0x2), (1, 0x0), (3, 0x6), (5, 0x1E), (7, 0x7E), (9, 0x1FE), (11, 0x7FE), (13, 0x1FFE),
    (14, 0x3FFE), (17, 0x1FFFC), (19, 0x7FFF8), (20, 0xFFFFB), (20, 0xFFFFC), (20, 0xFFFFD),
    (20, 0xFFFFE), (20, 0xFFFFF),
];
#[rustfmt::skip]
const IID_FINE_DF: [(u8, u32); 61] = [
    (18, 0x1FEB4), (18, 0x1FEB5), (18, 0x1FD76), (18, 0x1FD77), (18, 0x1FD74), (18, 0x1FD75),
    (18, 0x1FE8A), (18, 0x1FE8B), (18, 0x1FE88), (17, 0xFE80), (18, 0x1FEB6), (17, 0xFE82),
    (17, 0xFEB8), (16, 0x7F42), (16, 0x7FAE), (15, 0x3FAF), (14, 0x1FD1), (14, 0x1FE9),
    (13, 0xFE9), (12, 0x7EA), (12, 0x7FB), (11, 0x3FB), (10, 0x1FB), (10, 0x1FF), (8, 0x7C),
    (7, 0x3C), (6, 0x1C), (5, 0xC), (4, 0x0), (3, 0x1), (1, 0x1), (3, 0x2), (4, 0x1), (5, 0xD),
    (6, 0x1D), (7, 0x3D), (8, 0x7D), (9, 0xFC), (10, 0x1FC), (11, 0x3FC), (11, 0x3F4),
    (12, 0x7EB), (13, 0xFEA), (14, 0x1FEA), (14, 0x1FD6), (15, 0x3FD0), (16, 0x7FAF),
    (16, 0x7F43), (17, 0xFEB9), (17, 0xFE83), (18, 0x1FEB7), (17, 0xFE81), (18, 0x1FE89),
    (18, 0x1FE8E), (18, 0x1FE8F), (18, 0x1FE8C), (18, 0x1FE8D), (18, 0x1FEB2), (18, 0x1FEB3),
    (18, 0x1FEB0), (18, 0x1FEB1),
];
#[rustfmt::skip]
const ICC_DF: [(u8, u32); 15] = [
    (14, 0x3FFF), (14, 0x3FFE), (12, 0xFFE), (10, 0x3FE), (7, 0x7E), (5, 0x1E), (3, 0x6),
    (1, 0x0), (2, 0x2), (4, 0xE), (6, 0x3E), (8, 0xFE), (9, 0x1FE), (11, 0x7FE), (13, 0x1FFE),
];
#[rustfmt::skip]
const ICC_DT: [(u8, u32); 15] = [
    (14, 0x3FFE), (13, 0x1FFE), (11, 0x7FE), (9, 0x1FE), (7, 0x7E), (5, 0x1E), (3, 0x6),
    (1, 0x0), (2, 0x2), (4, 0xE), (6, 0x3E), (8, 0xFE), (10, 0x3FE), (12, 0xFFE), (14, 0x3FFF),
];
const IPD_DF: [(u8, u32); 8] = [(1, 1), (3, 0), (4, 6), (4, 4), (4, 2), (4, 3), (4, 5), (4, 7)];
const IPD_DT: [(u8, u32); 8] = [(1, 1), (3, 2), (4, 2), (5, 3), (5, 2), (4, 0), (4, 3), (3, 3)];
const OPD_DF: [(u8, u32); 8] = [(1, 1), (3, 1), (4, 6), (4, 4), (5, 15), (5, 14), (4, 5), (3, 0)];
const OPD_DT: [(u8, u32); 8] = [(1, 1), (3, 2), (4, 1), (5, 7), (5, 6), (4, 0), (4, 2), (3, 3)];

/// 符号偏移: 中间符号表示差分 0
const IID_OFFSET: i32 = 14;
const IID_FINE_OFFSET: i32 = 30;
const ICC_OFFSET: i32 = 7;

/// PS 参数种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsParameter {
    /// 声道间强度差, 默认量化 (-7..=7)
    Iid,
    /// 声道间强度差, 细量化 (-15..=15)
    IidFine,
    /// 声道间相干
    Icc,
    /// 声道间相位差 (模 8)
    Ipd,
    /// 整体相位差 (模 8)
    Opd,
}

impl PsParameter {
    /// 参数存储槽位, 两种 IID 量化共用一个
    fn slot(self) -> usize {
        match self {
            Self::Iid | Self::IidFine => 0,
            Self::Icc => 1,
            Self::Ipd => 2,
            Self::Opd => 3,
        }
    }

    fn is_modulo(self) -> bool {
        matches!(self, Self::Ipd | Self::Opd)
    }
}

fn table(name: &'static str, rows: &[(u8, u32)], offset: i32) -> CodebookTable {
    CodebookTable::new(
        name,
        rows.iter()
            .enumerate()
            .map(|(i, &(len, code))| (code, len, i as i32 - offset)),
    )
}

const SLOTS: usize = 4;

type Envelopes = [[i32; MAX_PARS]; MAX_ENVELOPES];

/// PS 参数解码器
///
/// 保存当前帧各包络的参数, 以及上一帧最后一个包络 (时间差分的起点).
#[derive(Debug, Clone)]
pub struct PsParameterDecoder {
    iid_df: CodebookTable,
    iid_dt: CodebookTable,
    iid_fine_df: CodebookTable,
    icc_df: CodebookTable,
    icc_dt: CodebookTable,
    ipd_df: CodebookTable,
    ipd_dt: CodebookTable,
    opd_df: CodebookTable,
    opd_dt: CodebookTable,
    pars: [Envelopes; SLOTS],
    prev: [[i32; MAX_PARS]; SLOTS],
}

impl Default for PsParameterDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PsParameterDecoder {
    pub fn new() -> Self {
        Self {
            iid_df: table("ps_iid_df", &IID_DF, IID_OFFSET),
            iid_dt: table("ps_iid_dt", &IID_DT, IID_OFFSET),
            iid_fine_df: table("ps_iid_fine_df", &IID_FINE_DF, IID_FINE_OFFSET),
            icc_df: table("ps_icc_df", &ICC_DF, ICC_OFFSET),
            icc_dt: table("ps_icc_dt", &ICC_DT, ICC_OFFSET),
            ipd_df: table("ps_ipd_df", &IPD_DF, 0),
            ipd_dt: table("ps_ipd_dt", &IPD_DT, 0),
            opd_df: table("ps_opd_df", &OPD_DF, 0),
            opd_dt: table("ps_opd_dt", &OPD_DT, 0),
            pars: [[[0; MAX_PARS]; MAX_ENVELOPES]; SLOTS],
            prev: [[0; MAX_PARS]; SLOTS],
        }
    }

    fn table(&self, kind: PsParameter, dt: bool) -> MusiqueResult<&CodebookTable> {
        Ok(match (kind, dt) {
            (PsParameter::Iid, false) => &self.iid_df,
            (PsParameter::Iid, true) => &self.iid_dt,
            (PsParameter::IidFine, false) => &self.iid_fine_df,
            (PsParameter::IidFine, true) => {
                return Err(MusiqueError::Unsupported(
                    "PS: 细量化 IID 的时间差分码表".into(),
                ));
            }
            (PsParameter::Icc, false) => &self.icc_df,
            (PsParameter::Icc, true) => &self.icc_dt,
            (PsParameter::Ipd, false) => &self.ipd_df,
            (PsParameter::Ipd, true) => &self.ipd_dt,
            (PsParameter::Opd, false) => &self.opd_df,
            (PsParameter::Opd, true) => &self.opd_dt,
        })
    }

    /// 解码一个包络的 `count` 个参数
    ///
    /// - 频率差分 (`dt == false`): 从 band 0 起的累加和
    /// - 时间差分 (`dt == true`): 与前一包络对应 band 相加, 包络 0 使用上一帧最后一个包络
    ///
    /// IPD/OPD 结果取模 8.
    pub fn decode_pars(
        &mut self,
        br: &mut BitReader,
        kind: PsParameter,
        env: usize,
        dt: bool,
        count: usize,
    ) -> MusiqueResult<&[i32]> {
        if env >= MAX_ENVELOPES || count > MAX_PARS {
            return Err(MusiqueError::InvalidArgument(format!(
                "PS: 包络 {} / 参数个数 {} 越界",
                env, count
            )));
        }
        let k = kind.slot();
        let reference = if env > 0 {
            self.pars[k][env - 1]
        } else {
            self.prev[k]
        };
        let table = self.table(kind, dt)?;

        let mut values = [0i32; MAX_PARS];
        let mut acc = 0i32;
        for (i, value) in values.iter_mut().enumerate().take(count) {
            let delta = table.walk(br)?;
            let mut v = if dt { reference[i] + delta } else { acc + delta };
            if kind.is_modulo() {
                v &= 7;
            }
            acc = v;
            *value = v;
        }
        self.pars[k][env][..count].copy_from_slice(&values[..count]);
        Ok(&self.pars[k][env][..count])
    }

    /// 当前帧某个包络的参数
    pub fn pars(&self, kind: PsParameter, env: usize) -> &[i32] {
        &self.pars[kind.slot()][env.min(MAX_ENVELOPES - 1)]
    }

    /// 结束一帧: 记录最后一个包络作为下一帧时间差分的起点
    pub fn finish_frame(&mut self, env_count: usize) {
        if env_count == 0 {
            return;
        }
        let last = env_count.min(MAX_ENVELOPES) - 1;
        for k in 0..SLOTS {
            self.prev[k] = self.pars[k][last];
        }
    }

    /// 清空所有历史参数
    pub fn reset(&mut self) {
        self.pars = [[[0; MAX_PARS]; MAX_ENVELOPES]; SLOTS];
        self.prev = [[0; MAX_PARS]; SLOTS];
    }
}

/// PS 头部
///
/// 头部不一定每帧出现, 未出现时沿用上一次的设置.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PsHeader {
    pub iid_enabled: bool,
    pub iid_mode: u8,
    pub iid_pars: usize,
    /// iid_mode > 2 时使用细量化
    pub iid_fine: bool,
    pub icc_enabled: bool,
    pub icc_mode: u8,
    pub icc_pars: usize,
    /// icc_mode > 2 时使用混合方式 B
    pub icc_mixing_b: bool,
    /// 由扩展中的 enable_ipdopd 决定
    pub ipd_opd_enabled: bool,
    pub ipd_opd_pars: usize,
    pub ext_enabled: bool,
    /// 当前帧是否使用 34 子带
    pub use34: bool,
    pub use34_prev: bool,
}

impl PsHeader {
    /// 解析 enable_iid .. enable_ext
    pub fn decode(&mut self, br: &mut BitReader) -> MusiqueResult<()> {
        self.iid_enabled = br.read_bool()?;
        if self.iid_enabled {
            let mode = br.read_bits(3)? as u8;
            if mode > 5 {
                return Err(MusiqueError::InvalidData(format!(
                    "PS: 保留的 iid_mode {}",
                    mode
                )));
            }
            self.iid_mode = mode;
            self.iid_pars = IID_ICC_PARS[usize::from(mode % 3)];
            self.iid_fine = mode > 2;
            self.ipd_opd_pars = IPD_OPD_PARS[usize::from(mode % 3)];
        } else {
            self.iid_mode = 0;
            self.iid_pars = 0;
            self.iid_fine = false;
            self.ipd_opd_pars = 0;
        }

        self.icc_enabled = br.read_bool()?;
        if self.icc_enabled {
            let mode = br.read_bits(3)? as u8;
            if mode > 5 {
                return Err(MusiqueError::InvalidData(format!(
                    "PS: 保留的 icc_mode {}",
                    mode
                )));
            }
            self.icc_mode = mode;
            self.icc_pars = IID_ICC_PARS[usize::from(mode % 3)];
            self.icc_mixing_b = mode > 2;
        } else {
            self.icc_mode = 0;
            self.icc_pars = 0;
            self.icc_mixing_b = false;
        }

        self.ext_enabled = br.read_bool()?;
        Ok(())
    }

    /// 每帧开始时调用, 即使本帧没有头部
    pub fn start_new_frame(&mut self) {
        // iid 与 icc 都关闭时沿用上一帧的子带数
        if self.iid_enabled || self.icc_enabled {
            self.use34_prev = self.use34;
            self.use34 = (self.iid_enabled && self.iid_pars == 34)
                || (self.icc_enabled && self.icc_pars == 34);
        }
    }
}

/// 一帧 PS 数据的包络划分
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PsFrameInfo {
    /// 本帧是否携带头部
    pub header_present: bool,
    /// false: 固定边界, true: 可变边界
    pub frame_class: bool,
    /// 本帧解码的包络数, 0 表示沿用上一帧的参数
    pub env_count: usize,
    pub border_positions: [u8; MAX_ENVELOPES],
}

/// PS 旁路信息解码器
#[derive(Debug, Clone, Default)]
pub struct PsDecoder {
    header: PsHeader,
    frame: PsFrameInfo,
    pars: PsParameterDecoder,
}

impl PsDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(&self) -> &PsHeader {
        &self.header
    }

    pub fn frame(&self) -> &PsFrameInfo {
        &self.frame
    }

    /// 当前帧某个包络的参数, 长度由头部决定
    pub fn pars(&self, kind: PsParameter, env: usize) -> &[i32] {
        let count = match kind {
            PsParameter::Iid | PsParameter::IidFine => self.header.iid_pars,
            PsParameter::Icc => self.header.icc_pars,
            PsParameter::Ipd | PsParameter::Opd => self.header.ipd_opd_pars,
        };
        &self.pars.pars(kind, env)[..count]
    }

    /// 解码一帧 ps_data
    pub fn decode(&mut self, br: &mut BitReader) -> MusiqueResult<()> {
        self.header.start_new_frame();
        let header_present = br.read_bool()?;
        if header_present {
            self.header.decode(br)?;
        }

        let frame_class = br.read_bool()?;
        let env_idx = br.read_bits(2)? as usize;
        // 表 8.29
        let env_count = match (frame_class, env_idx) {
            (false, 3) => 4,
            (false, n) => n,
            (true, n) => n + 1,
        };

        let mut border_positions = [0u8; MAX_ENVELOPES];
        for (e, border) in border_positions.iter_mut().enumerate().take(env_count) {
            *border = if frame_class {
                br.read_bits(5)? as u8
            } else {
                (NUM_QMF_SLOTS * (e + 1) / env_count - 1) as u8
            };
        }
        self.frame = PsFrameInfo {
            header_present,
            frame_class,
            env_count,
            border_positions,
        };

        if self.header.iid_enabled {
            let kind = if self.header.iid_fine {
                PsParameter::IidFine
            } else {
                PsParameter::Iid
            };
            for e in 0..env_count {
                let dt = br.read_bool()?;
                self.pars.decode_pars(br, kind, e, dt, self.header.iid_pars)?;
            }
        }

        if self.header.icc_enabled {
            for e in 0..env_count {
                let dt = br.read_bool()?;
                self.pars
                    .decode_pars(br, PsParameter::Icc, e, dt, self.header.icc_pars)?;
            }
        }

        if self.header.ext_enabled {
            self.decode_extensions(br, env_count)?;
        }

        trace!(
            "PS: frame_class={} env_count={} header={}",
            frame_class, env_count, header_present
        );
        self.pars.finish_frame(env_count);
        Ok(())
    }

    fn decode_extensions(&mut self, br: &mut BitReader, env_count: usize) -> MusiqueResult<()> {
        let mut size = br.read_bits(4)? as usize;
        if size == 15 {
            size += br.read_bits(8)? as usize;
        }
        let mut left = size * 8;

        while left > 7 {
            let id = br.read_bits(2)?;
            left -= 2;
            let start = br.bits_read();
            if id == 0 {
                self.decode_ipd_opd(br, env_count)?;
            } else {
                debug!("PS: 忽略扩展 id={}", id);
            }
            let used = br.bits_read() - start;
            left = left.checked_sub(used).ok_or_else(|| {
                MusiqueError::InvalidData(format!("PS: 扩展数据超出声明长度 {} 位", size * 8))
            })?;
        }
        br.skip_bits(left)?;
        Ok(())
    }

    fn decode_ipd_opd(&mut self, br: &mut BitReader, env_count: usize) -> MusiqueResult<()> {
        self.header.ipd_opd_enabled = br.read_bool()?;
        if self.header.ipd_opd_enabled {
            let count = self.header.ipd_opd_pars;
            for e in 0..env_count {
                let dt = br.read_bool()?;
                self.pars.decode_pars(br, PsParameter::Ipd, e, dt, count)?;
                let dt = br.read_bool()?;
                self.pars.decode_pars(br, PsParameter::Opd, e, dt, count)?;
            }
        }
        // reserved_ps
        br.skip_bits(1)?;
        Ok(())
    }
}
