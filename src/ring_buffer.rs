// 固定長のリングバッファ（バイト列の FIFO）
//
// 割り込みハンドラとタスクの間でロック無しに使う。書き込み位置は書き込み側だけ、
// 読み出し位置は読み出し側だけが触り、両者が触るのは格納数 count のみ。
// count の更新はアトミックな read-modify-write (fetch_add / fetch_sub) なので、
// LDREX/STREX を持つ Armv7-M (Cortex-M3/M4/M7) が前提。Armv6-M では使えない。
//
// 満杯時の put は黙って捨てる（割り込みハンドラを待たせない）。
// 空のときの get は 0 を返すので、0 が有効なデータなら先に is_empty() を見ること。

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

// init() 済みかどうかの目印
const INIT_COOKIE: u32 = 0x0BAD_C0DE;

pub struct RingBuffer<const N: usize> {
    cookie: u32,
    count: AtomicUsize,
    write_index: AtomicUsize,
    read_index: AtomicUsize,
    dropped: AtomicUsize,
    buffer: UnsafeCell<[u8; N]>,
}

// 書き込み側と読み出し側が触る領域は split() で分けているので共有して良い
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

impl<const N: usize> RingBuffer<N> {
    /// 初期化済みの空バッファ
    pub const fn new() -> Self {
        Self::with_cookie(INIT_COOKIE)
    }

    /// 未初期化のバッファ。init() を呼ぶまでどの操作も assert で止まる
    pub const fn uninit() -> Self {
        Self::with_cookie(0)
    }

    const fn with_cookie(cookie: u32) -> Self {
        assert!(N > 0);
        Self {
            cookie,
            count: AtomicUsize::new(0),
            write_index: AtomicUsize::new(0),
            read_index: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
            buffer: UnsafeCell::new([0; N]),
        }
    }

    /// 位置と格納数を 0 に戻して使える状態にする
    pub fn init(&mut self) {
        *self.count.get_mut() = 0;
        *self.write_index.get_mut() = 0;
        *self.read_index.get_mut() = 0;
        *self.dropped.get_mut() = 0;
        self.cookie = INIT_COOKIE;
    }

    pub fn is_initialized(&self) -> bool {
        self.cookie == INIT_COOKIE
    }

    pub fn capacity(&self) -> usize {
        self.check_init();
        N
    }

    pub fn len(&self) -> usize {
        self.check_init();
        self.count.load(Ordering::Acquire)
    }

    pub fn space(&self) -> usize {
        let count = self.len();
        assert!(count <= N);
        N - count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    /// 満杯で捨てたバイト数
    pub fn dropped(&self) -> usize {
        self.check_init();
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn put(&mut self, val: u8) {
        // &mut なので他に読み書きしている者はいない
        unsafe { self.produce(val) }
    }

    pub fn get(&mut self) -> u8 {
        unsafe { self.consume() }
    }

    /// 書き込み側と読み出し側のハンドルに分ける
    /// 片方を割り込みハンドラ、もう片方をタスクに渡す
    pub fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        self.check_init();
        let rb: &Self = self;
        (Producer { rb }, Consumer { rb })
    }

    fn check_init(&self) {
        assert!(self.is_initialized(), "ring buffer used before init");
    }

    // 呼び出し側は書き込み側が自分一人であることを保証すること
    unsafe fn produce(&self, val: u8) {
        self.check_init();
        let count = self.count.load(Ordering::Acquire);
        assert!(count <= N);
        if count == N {
            // 満杯なら黙って捨てる
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let index = self.write_index.load(Ordering::Relaxed);
        assert!(index < N);
        (self.buffer.get() as *mut u8).add(index).write_volatile(val);
        self.write_index
            .store(if index + 1 == N { 0 } else { index + 1 }, Ordering::Relaxed);
        // データを書いてから数を増やす（読み出し側は count を見てから読む）
        self.count.fetch_add(1, Ordering::Release);
    }

    // 呼び出し側は読み出し側が自分一人であることを保証すること
    unsafe fn consume(&self) -> u8 {
        self.check_init();
        let count = self.count.load(Ordering::Acquire);
        assert!(count <= N);
        if count == 0 {
            return 0;
        }

        let index = self.read_index.load(Ordering::Relaxed);
        assert!(index < N);
        let val = (self.buffer.get() as *const u8).add(index).read_volatile();
        self.read_index
            .store(if index + 1 == N { 0 } else { index + 1 }, Ordering::Relaxed);
        self.count.fetch_sub(1, Ordering::Release);
        val
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// 書き込み側ハンドル（1つしか作れない）
pub struct Producer<'a, const N: usize> {
    rb: &'a RingBuffer<N>,
}

impl<'a, const N: usize> Producer<'a, N> {
    pub fn put(&mut self, val: u8) {
        unsafe { self.rb.produce(val) }
    }

    pub fn is_full(&self) -> bool {
        self.rb.is_full()
    }

    pub fn space(&self) -> usize {
        self.rb.space()
    }

    pub fn capacity(&self) -> usize {
        self.rb.capacity()
    }

    pub fn dropped(&self) -> usize {
        self.rb.dropped()
    }
}

/// 読み出し側ハンドル（1つしか作れない）
pub struct Consumer<'a, const N: usize> {
    rb: &'a RingBuffer<N>,
}

impl<'a, const N: usize> Consumer<'a, N> {
    pub fn get(&mut self) -> u8 {
        unsafe { self.rb.consume() }
    }

    pub fn is_empty(&self) -> bool {
        self.rb.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rb.len()
    }

    pub fn capacity(&self) -> usize {
        self.rb.capacity()
    }

    pub fn dropped(&self) -> usize {
        self.rb.dropped()
    }
}

// ハンドルはそれぞれ別のコンテキストへ move される
unsafe impl<'a, const N: usize> Send for Producer<'a, N> {}
unsafe impl<'a, const N: usize> Send for Consumer<'a, N> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_buffer_is_empty() {
        let rb: RingBuffer<8> = RingBuffer::new();
        assert!(rb.is_empty());
        assert!(!rb.is_full());
        assert_eq!(rb.capacity(), 8);
        assert_eq!(rb.space(), 8);
    }

    #[test]
    fn values_come_out_in_put_order_across_wraparound() {
        let mut rb: RingBuffer<4> = RingBuffer::new();
        let mut out = std::vec::Vec::new();
        // 容量を超えない範囲で put/get を交互に入れて何周かさせる
        for chunk in [&[1u8, 2, 3][..], &[4, 5], &[6, 7, 8, 9], &[10]] {
            for &v in chunk {
                rb.put(v);
            }
            while !rb.is_empty() {
                out.push(rb.get());
            }
        }
        assert_eq!(out, (1..=10).collect::<std::vec::Vec<u8>>());
    }

    #[test]
    fn put_on_full_buffer_is_discarded() {
        let mut rb: RingBuffer<3> = RingBuffer::new();
        rb.put(1);
        rb.put(2);
        rb.put(3);
        assert!(rb.is_full());
        assert_eq!(rb.space(), 0);

        rb.put(4);
        assert_eq!(rb.len(), 3);
        assert_eq!(rb.dropped(), 1);
        assert_eq!([rb.get(), rb.get(), rb.get()], [1, 2, 3]);
    }

    #[test]
    fn get_on_empty_buffer_returns_zero() {
        let mut rb: RingBuffer<2> = RingBuffer::new();
        assert_eq!(rb.get(), 0);
        assert_eq!(rb.len(), 0);
        rb.put(7);
        assert_eq!(rb.get(), 7);
        assert_eq!(rb.get(), 0);
        assert_eq!(rb.len(), 0);
    }

    #[test]
    #[should_panic(expected = "ring buffer used before init")]
    fn uninitialized_buffer_trips_assert() {
        let mut rb: RingBuffer<4> = RingBuffer::uninit();
        rb.put(1);
    }

    #[test]
    fn init_resets_state() {
        let mut rb: RingBuffer<4> = RingBuffer::uninit();
        rb.init();
        rb.put(1);
        rb.put(2);
        rb.init();
        assert!(rb.is_empty());
        assert_eq!(rb.get(), 0);
    }

    #[test]
    fn split_handles_share_one_queue() {
        let mut rb: RingBuffer<4> = RingBuffer::new();
        let (mut tx, mut rx) = rb.split();
        tx.put(b'a');
        tx.put(b'b');
        assert_eq!(rx.len(), 2);
        assert_eq!(rx.get(), b'a');
        assert_eq!(tx.space(), 3);
        assert_eq!(rx.get(), b'b');
        assert!(rx.is_empty());
    }

    #[test]
    fn producer_and_consumer_threads_keep_fifo_order() {
        // 割り込みとタスクの代わりにスレッドで同時に叩く
        const TOTAL: usize = 100_000;
        let mut rb: RingBuffer<16> = RingBuffer::new();
        let (mut tx, mut rx) = rb.split();
        std::thread::scope(|s| {
            s.spawn(move || {
                for i in 0..TOTAL {
                    while tx.is_full() {
                        std::hint::spin_loop();
                    }
                    tx.put((i % 251) as u8);
                }
            });
            s.spawn(move || {
                for i in 0..TOTAL {
                    while rx.is_empty() {
                        std::hint::spin_loop();
                    }
                    assert_eq!(rx.get(), (i % 251) as u8);
                }
            });
        });
    }
}
