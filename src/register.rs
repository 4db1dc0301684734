// レジスタのビットフィールド操作
// C のビットフィールド構造体はコンパイラ依存でレイアウトが保証されないので、
// オフセットと幅を定数で持ち、u32 に対してマスク付きの読み書きをする。

/// n ビット目だけが立った値
pub const fn bit(n: u8) -> u32 {
    1 << n
}

/// レジスタ内の連続したビット範囲
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    offset: u8,
    width: u8,
}

impl Field {
    pub const fn new(offset: u8, width: u8) -> Self {
        assert!(width > 0 && offset as u32 + width as u32 <= 32);
        Self { offset, width }
    }

    // 1ビットのフィールド
    pub const fn flag(offset: u8) -> Self {
        Self::new(offset, 1)
    }

    /// レジスタ上の位置に合わせたマスク
    pub const fn mask(&self) -> u32 {
        let ones = if self.width == 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        };
        ones << self.offset
    }

    pub const fn get(&self, reg: u32) -> u32 {
        (reg & self.mask()) >> self.offset
    }

    /// reg のフィールド部分だけを value に置き換えた値を返す（read-modify-write の modify 部分）
    pub const fn set(&self, reg: u32, value: u32) -> u32 {
        (reg & !self.mask()) | ((value << self.offset) & self.mask())
    }

    pub const fn is_set(&self, reg: u32) -> bool {
        reg & self.mask() != 0
    }
}
