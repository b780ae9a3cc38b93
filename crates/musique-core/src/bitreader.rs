//! 比特流读取器.
//!
//! 提供从字节缓冲区中按位读取数据的能力, 是 AAC 语法解析与 Huffman 解码的基础设施.
//!
//! 按大端位序读取 (MSB first). 读取不足时返回 [`MusiqueError::TruncatedStream`],
//! 且不移动游标, 错误中携带失败读取开始时的位偏移.

use crate::{MusiqueError, MusiqueResult};

/// 比特流读取器
///
/// 从字节缓冲区中按位读取数据, 使用大端位序 (MSB first).
///
/// # 示例
/// ```
/// use musique_core::bitreader::BitReader;
///
/// let data = [0b10110001, 0b01010101];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read_bits(4).unwrap(), 0b1011);
/// assert_eq!(br.read_bits(4).unwrap(), 0b0001);
/// assert_eq!(br.read_bits(8).unwrap(), 0b01010101);
/// ```
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    /// 源数据
    data: &'a [u8],
    /// 当前位位置 (相对 data 起点)
    pos: usize,
    /// 可读上限 (位, 不含)
    end: usize,
}

impl<'a> BitReader<'a> {
    /// 创建新的比特流读取器
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            end: data.len() * 8,
        }
    }

    /// 获取已读取的总位数
    pub fn bits_read(&self) -> usize {
        self.pos
    }

    /// 获取剩余可读位数
    pub fn bits_left(&self) -> usize {
        self.end - self.pos
    }

    /// 是否已到达末尾
    pub fn is_eof(&self) -> bool {
        self.bits_left() == 0
    }

    fn ensure(&self, n: u32) -> MusiqueResult<()> {
        if (n as usize) > self.bits_left() {
            return Err(MusiqueError::TruncatedStream {
                position: self.pos,
                requested: n,
                available: self.bits_left(),
            });
        }
        Ok(())
    }

    /// 读取 1 个位
    pub fn read_bit(&mut self) -> MusiqueResult<u32> {
        self.ensure(1)?;
        let bit = (self.data[self.pos >> 3] >> (7 - (self.pos & 7))) & 1;
        self.pos += 1;
        Ok(u32::from(bit))
    }

    /// 读取 1 个位并转换为布尔值
    pub fn read_bool(&mut self) -> MusiqueResult<bool> {
        Ok(self.read_bit()? != 0)
    }

    /// 读取 N 个位 (最多 32 位)
    ///
    /// 按大端位序读取, 返回值的低 N 位有效.
    pub fn read_bits(&mut self, n: u32) -> MusiqueResult<u32> {
        let value = self.peek_bits(n)?;
        self.pos += n as usize;
        Ok(value)
    }

    /// 窥视 N 个位 (不移动位置)
    pub fn peek_bits(&self, n: u32) -> MusiqueResult<u32> {
        if n == 0 {
            return Ok(0);
        }
        if n > 32 {
            return Err(MusiqueError::InvalidArgument(format!(
                "read_bits: n={} 超过 32 位",
                n,
            )));
        }
        self.ensure(n)?;

        let mut result: u64 = 0;
        let mut pos = self.pos;
        let mut remaining = n;

        while remaining > 0 {
            let bit_pos = (pos & 7) as u32;
            let available = 8 - bit_pos;
            let to_read = remaining.min(available);

            // 从当前字节中提取位
            let shift = available - to_read;
            let mask = ((1u32 << to_read) - 1) as u8;
            let bits = (self.data[pos >> 3] >> shift) & mask;

            result = (result << to_read) | u64::from(bits);
            pos += to_read as usize;
            remaining -= to_read;
        }

        Ok(result as u32)
    }

    /// 跳过 N 个位
    pub fn skip_bits(&mut self, n: usize) -> MusiqueResult<()> {
        if n > self.bits_left() {
            return Err(MusiqueError::TruncatedStream {
                position: self.pos,
                requested: n.min(u32::MAX as usize) as u32,
                available: self.bits_left(),
            });
        }
        self.pos += n;
        Ok(())
    }

    /// 对齐到下一个字节边界
    ///
    /// 如果当前已在字节边界, 则不做任何事. 对齐位置不会超过可读上限.
    pub fn align_to_byte(&mut self) {
        let aligned = (self.pos + 7) & !7;
        self.pos = aligned.min(self.end);
    }

    /// 获取当前字节位置
    pub fn byte_position(&self) -> usize {
        self.pos >> 3
    }

    /// 从当前位置截取一个只能读取后续 `bits` 位的子读取器
    ///
    /// 子读取器与父读取器共享同一缓冲区, 父读取器位置不变.
    /// 子读取器的位偏移仍相对整个缓冲区, 因此截断错误中的位置可直接对照原始数据.
    pub fn sub_reader(&self, bits: usize) -> MusiqueResult<BitReader<'a>> {
        if bits > self.bits_left() {
            return Err(MusiqueError::TruncatedStream {
                position: self.pos,
                requested: bits.min(u32::MAX as usize) as u32,
                available: self.bits_left(),
            });
        }
        Ok(BitReader {
            data: self.data,
            pos: self.pos,
            end: self.pos + bits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_bits_basic() {
        let data = [0b10110001, 0b01010101];
        let mut br = BitReader::new(&data);

        assert_eq!(br.read_bits(1).unwrap(), 1);
        assert_eq!(br.read_bits(1).unwrap(), 0);
        assert_eq!(br.read_bits(2).unwrap(), 0b11);
        assert_eq!(br.read_bits(4).unwrap(), 0b0001);
        assert_eq!(br.read_bits(8).unwrap(), 0b01010101);

        assert!(br.is_eof());
    }

    #[test]
    fn test_read_bits_32_bit() {
        let data = [0xFF, 0x00, 0xFF, 0x00];
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_bits(32).unwrap(), 0xFF00FF00);
    }

    #[test]
    fn test_read_bits_32_unaligned() {
        let data = [0x0F, 0xFF, 0xFF, 0xFF, 0xF0];
        let mut br = BitReader::new(&data);
        br.read_bits(4).unwrap();
        assert_eq!(br.read_bits(32).unwrap(), 0xFFFF_FFFF);
        assert_eq!(br.bits_left(), 4);
    }

    #[test]
    fn test_read_bool() {
        let data = [0b1000_0000];
        let mut br = BitReader::new(&data);
        assert!(br.read_bool().unwrap());
        assert!(!br.read_bool().unwrap());
    }

    #[test]
    fn test_peek_bits() {
        let data = [0b10110001];
        let mut br = BitReader::new(&data);

        assert_eq!(br.peek_bits(4).unwrap(), 0b1011);
        assert_eq!(br.peek_bits(4).unwrap(), 0b1011); // 不移动
        assert_eq!(br.read_bits(4).unwrap(), 0b1011); // 现在移动了
        assert_eq!(br.peek_bits(4).unwrap(), 0b0001);
    }

    #[test]
    fn test_skip_bits() {
        let data = [0b10110001, 0b01010101];
        let mut br = BitReader::new(&data);

        br.skip_bits(4).unwrap();
        assert_eq!(br.read_bits(4).unwrap(), 0b0001);
        br.skip_bits(4).unwrap();
        assert_eq!(br.read_bits(4).unwrap(), 0b0101);
    }

    #[test]
    fn test_align_to_byte() {
        let data = [0b10110001, 0b01010101];
        let mut br = BitReader::new(&data);

        br.read_bits(3).unwrap();
        br.align_to_byte();
        assert_eq!(br.byte_position(), 1);
        assert_eq!(br.read_bits(8).unwrap(), 0b01010101);
        br.align_to_byte();
        assert!(br.is_eof());
    }

    #[test]
    fn test_bits_left() {
        let data = [0x00, 0x00];
        let mut br = BitReader::new(&data);

        assert_eq!(br.bits_left(), 16);
        br.read_bits(5).unwrap();
        assert_eq!(br.bits_left(), 11);
        br.read_bits(11).unwrap();
        assert_eq!(br.bits_left(), 0);
        assert!(br.is_eof());
    }

    #[test]
    fn test_截断错误位置精确() {
        let data = [0xAB, 0xCD];
        let mut br = BitReader::new(&data);
        br.read_bits(10).unwrap();

        match br.read_bits(7) {
            Err(MusiqueError::TruncatedStream {
                position,
                requested,
                available,
            }) => {
                assert_eq!(position, 10);
                assert_eq!(requested, 7);
                assert_eq!(available, 6);
            }
            other => panic!("应返回截断错误, 实际: {other:?}"),
        }
        // 失败的读取不移动游标
        assert_eq!(br.bits_read(), 10);
        assert_eq!(br.read_bits(6).unwrap(), 0b00_1101);
    }

    #[test]
    fn test_超过32位参数错误() {
        let data = [0u8; 8];
        let br = BitReader::new(&data);
        assert!(matches!(
            br.peek_bits(33),
            Err(MusiqueError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_sub_reader() {
        let data = [0b1010_1100, 0b1111_0000];
        let mut br = BitReader::new(&data);
        br.read_bits(2).unwrap();

        let mut sub = br.sub_reader(6).unwrap();
        assert_eq!(sub.read_bits(6).unwrap(), 0b10_1100);
        let err = sub.read_bit().unwrap_err();
        assert!(err.is_truncated());

        // 父读取器不受影响
        assert_eq!(br.bits_read(), 2);
        br.skip_bits(6).unwrap();
        assert_eq!(br.read_bits(4).unwrap(), 0b1111);
        assert!(br.sub_reader(5).is_err());
    }

    #[test]
    fn test_eof_error() {
        let data = [0x00];
        let mut br = BitReader::new(&data);

        br.read_bits(8).unwrap();
        assert!(br.read_bits(1).is_err());
        assert!(br.read_bit().is_err());
    }
}
