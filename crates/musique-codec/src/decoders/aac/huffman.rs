//! AAC Huffman 码本与查表解码器.
//!
//! 基于 ISO/IEC 14496-3 定义的 Huffman 码本. 解码采用"有序行查表":
//! 码表按码长升序排列, 先读入第一行码长的位数, 与该行码字比较,
//! 不匹配时只补读与下一行码长之差的位数. 任何一次解码读取的位数
//! 不会超过最终匹配码字的长度, 也不会超过码表的最大码长.
//!
//! 码本形状 (quad/pair, 有符号/无符号, 是否带 escape) 由 [`CodebookShape`]
//! 元数据记录描述, 解码分支只依赖该记录.

use log::trace;
use musique_core::bitreader::BitReader;
use musique_core::{MusiqueError, MusiqueResult};

use super::codebook_data::*;

/// escape 码本标记值
pub const ESCAPE_MARKER: i32 = 16;

/// escape 序列 (前缀 + 尾数) 的最大位数
pub const ESCAPE_MAX_BITS: u32 = 21;

/// 虚拟码本 16-31 (ER AAC VCB11) 的最大绝对值
const VCB11_LAV: [u32; 16] = [
    16, 31, 47, 63, 95, 127, 159, 191, 223, 255, 319, 383, 511, 767, 1023, 2047,
];

// ============================================================
// 有序行查表
// ============================================================

/// 查表中的一行: 码长, 码字, 解码值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodebookRow {
    pub len: u8,
    pub code: u32,
    pub value: i32,
}

/// 按码长升序排列的前缀码表
#[derive(Debug, Clone)]
pub struct CodebookTable {
    name: &'static str,
    rows: Vec<CodebookRow>,
}

impl CodebookTable {
    /// 从 (码字, 码长, 值) 三元组构建码表, 行按 (码长, 码字) 排序
    pub fn new(name: &'static str, entries: impl IntoIterator<Item = (u32, u8, i32)>) -> Self {
        let mut rows: Vec<CodebookRow> = entries
            .into_iter()
            .map(|(code, len, value)| CodebookRow { len, code, value })
            .collect();
        rows.sort_by_key(|r| (r.len, r.code));
        Self { name, rows }
    }

    /// 码表名称 (用于错误信息)
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 码表中最长码字的位数
    pub fn max_len(&self) -> u32 {
        self.rows.last().map_or(0, |r| u32::from(r.len))
    }

    /// 全部查表行
    pub fn rows(&self) -> &[CodebookRow] {
        &self.rows
    }

    /// 从比特流解码一个符号
    ///
    /// 遍历完所有行仍未匹配时返回 [`MusiqueError::MalformedTableWalk`].
    pub fn walk(&self, br: &mut BitReader) -> MusiqueResult<i32> {
        let first = self.rows.first().ok_or(MusiqueError::MalformedTableWalk {
            table: self.name,
            bits: 0,
        })?;
        let mut len = u32::from(first.len);
        let mut cw = br.read_bits(len)?;

        for row in &self.rows {
            let row_len = u32::from(row.len);
            if row_len > len {
                let extra = row_len - len;
                cw = (cw << extra) | br.read_bits(extra)?;
                len = row_len;
            }
            if cw == row.code {
                return Ok(row.value);
            }
        }

        Err(MusiqueError::MalformedTableWalk {
            table: self.name,
            bits: len,
        })
    }
}

// ============================================================
// 码本形状元数据
// ============================================================

/// 频谱码本形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodebookShape {
    /// 每个码字解码的系数个数 (4=quad, 2=pair)
    pub group_size: usize,
    /// 值为幅度, 每个非零幅度额外读取 1 位符号
    pub is_unsigned: bool,
    /// 幅度 16 触发 escape 序列
    pub has_escape: bool,
    /// 每维取值个数
    pub modulo: u32,
    /// 有符号码本的值偏移
    pub offset: i32,
    /// 解码后允许的最大绝对值
    pub lav: u32,
}

const fn shape(group_size: usize, is_unsigned: bool, modulo: u32, offset: i32, lav: u32) -> CodebookShape {
    CodebookShape {
        group_size,
        is_unsigned,
        has_escape: false,
        modulo,
        offset,
        lav,
    }
}

/// 频谱码本 1-11 的形状 (下标 0 = 码本 1)
pub const SPECTRAL_SHAPES: [CodebookShape; 11] = [
    shape(4, false, 3, -1, 1),
    shape(4, false, 3, -1, 1),
    shape(4, true, 3, 0, 2),
    shape(4, true, 3, 0, 2),
    shape(2, false, 9, -4, 4),
    shape(2, false, 9, -4, 4),
    shape(2, true, 8, 0, 7),
    shape(2, true, 8, 0, 7),
    shape(2, true, 13, 0, 12),
    shape(2, true, 13, 0, 12),
    CodebookShape {
        group_size: 2,
        is_unsigned: true,
        has_escape: true,
        modulo: 17,
        offset: 0,
        lav: 8191,
    },
];

/// 是否为可解码的频谱码本 (1-11, 虚拟码本 16-31)
pub fn is_spectral_codebook(cb: u8) -> bool {
    (1..=11).contains(&cb) || (16..=31).contains(&cb)
}

/// 查询码本形状
///
/// 虚拟码本 16-31 与码本 11 同形, 仅最大绝对值不同.
pub fn codebook_shape(cb: u8) -> MusiqueResult<CodebookShape> {
    match cb {
        1..=11 => Ok(SPECTRAL_SHAPES[cb as usize - 1]),
        16..=31 => Ok(CodebookShape {
            lav: VCB11_LAV[cb as usize - 16],
            ..SPECTRAL_SHAPES[10]
        }),
        _ => Err(MusiqueError::UnsupportedCodebook(cb)),
    }
}

// ============================================================
// 码本集合
// ============================================================

/// 一次频谱解码得到的系数元组
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpectralTuple {
    values: [i32; 4],
    len: usize,
}

impl SpectralTuple {
    /// 有效系数
    pub fn as_slice(&self) -> &[i32] {
        &self.values[..self.len]
    }
}

/// 所有 AAC Huffman 码本集合
///
/// 每个解码器实例在创建时构建一次, 之后只读.
#[derive(Debug, Clone)]
pub struct AacCodebooks {
    /// Scale factor 码本, 解码值为无符号索引 0-120
    pub scale_factor: CodebookTable,
    /// 频谱码本 1-11 (下标 0 = 码本 1), 解码值为线性元组索引
    spectral: [CodebookTable; 11],
}

impl AacCodebooks {
    /// 构建所有码本
    pub fn build() -> Self {
        Self {
            scale_factor: CodebookTable::new("scale_factor", SF_TABLE),
            spectral: [
                spectral_table("spectral_1", &CODES_1, &BITS_1),
                spectral_table("spectral_2", &CODES_2, &BITS_2),
                spectral_table("spectral_3", &CODES_3, &BITS_3),
                spectral_table("spectral_4", &CODES_4, &BITS_4),
                spectral_table("spectral_5", &CODES_5, &BITS_5),
                spectral_table("spectral_6", &CODES_6, &BITS_6),
                spectral_table("spectral_7", &CODES_7, &BITS_7),
                spectral_table("spectral_8", &CODES_8, &BITS_8),
                spectral_table("spectral_9", &CODES_9, &BITS_9),
                spectral_table("spectral_10", &CODES_10, &BITS_10),
                spectral_table("spectral_11", &CODES_11, &BITS_11),
            ],
        }
    }

    /// 解码一个 scale factor 索引 (0-120), 调用方加上 `index - 60`
    pub fn decode_scale_factor(&self, br: &mut BitReader) -> MusiqueResult<i32> {
        self.scale_factor.walk(br)
    }

    /// 获取频谱码本的查表 (虚拟码本映射到码本 11)
    pub fn spectral_table(&self, cb: u8) -> MusiqueResult<&CodebookTable> {
        codebook_shape(cb)?;
        let idx = if cb >= 16 { 10 } else { cb as usize - 1 };
        Ok(&self.spectral[idx])
    }

    /// 解码一个频谱码字, 返回 4 个 (quad) 或 2 个 (pair) 量化系数
    ///
    /// 读取顺序: 码字, 各非零幅度的符号位, 各 escape 标记值的 escape 序列.
    pub fn decode_spectral(&self, cb: u8, br: &mut BitReader) -> MusiqueResult<SpectralTuple> {
        let shape = codebook_shape(cb)?;
        let index = self.spectral_table(cb)?.walk(br)?;
        let mut tuple = SpectralTuple {
            values: index_to_values(index as u32, &shape),
            len: shape.group_size,
        };
        let values = &mut tuple.values[..shape.group_size];

        if shape.is_unsigned {
            for v in values.iter_mut() {
                if *v != 0 && br.read_bool()? {
                    *v = -*v;
                }
            }
        }

        if shape.has_escape {
            for v in values.iter_mut() {
                if v.abs() == ESCAPE_MARKER {
                    let magnitude = read_escape(br, ESCAPE_MAX_BITS)?;
                    *v = if *v < 0 { -magnitude } else { magnitude };
                }
            }
            if cb >= 16 && values.iter().any(|v| v.unsigned_abs() > shape.lav) {
                trace!("AAC: 虚拟码本 {} 超出最大绝对值 {}, 元组置零", cb, shape.lav);
                values.iter_mut().for_each(|v| *v = 0);
            }
        }

        Ok(tuple)
    }
}

fn spectral_table(name: &'static str, codes: &[u16], bits: &[u8]) -> CodebookTable {
    CodebookTable::new(
        name,
        codes
            .iter()
            .zip(bits)
            .enumerate()
            .map(|(i, (&code, &len))| (u32::from(code), len, i as i32)),
    )
}

/// 将线性索引转换为值元组
///
/// 例: 码本 7 (pair, modulo=8, offset=0):
///   index=9 → v0=9/8=1, v1=9%8=1 → [1, 1, 0, 0]
fn index_to_values(idx: u32, shape: &CodebookShape) -> [i32; 4] {
    let m = shape.modulo;
    let mut vals = [0i32; 4];
    if shape.group_size == 4 {
        vals[0] = (idx / (m * m * m)) as i32 + shape.offset;
        vals[1] = ((idx / (m * m)) % m) as i32 + shape.offset;
        vals[2] = ((idx / m) % m) as i32 + shape.offset;
        vals[3] = (idx % m) as i32 + shape.offset;
    } else {
        vals[0] = (idx / m) as i32 + shape.offset;
        vals[1] = (idx % m) as i32 + shape.offset;
    }
    vals
}

/// 读取 escape 序列 (ISO 14496-3, 4.6.3.3)
///
/// 从宽度 4 开始, 每读到一个 1 宽度加 1, 读到 0 结束, 然后读取该宽度的尾数.
/// 结果为 `尾数 | 1 << 宽度`. 前缀与尾数合计超过 `max_bits` 视为查表失败.
pub fn read_escape(br: &mut BitReader, max_bits: u32) -> MusiqueResult<i32> {
    let max_width = (max_bits + 3) / 2;
    let mut width = 4u32;
    while br.read_bool()? {
        width += 1;
        if width > max_width {
            return Err(MusiqueError::MalformedTableWalk {
                table: "escape",
                bits: width - 4,
            });
        }
    }
    let mantissa = br.read_bits(width)?;
    Ok((mantissa | (1 << width)) as i32)
}

// ============================================================
// 测试
// ============================================================
