//! Paged arrays addressable by 64-bit indices
//!
//! An index is split into a page number (`index >> page_shift`) and an offset
//! inside that page (`index & page_mask`). Pages have a fixed size, only the
//! last page is shorter, so no single allocation ever has to hold the whole
//! array.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of index bits addressing an element inside a page
pub const PAGE_SHIFT: u32 = 14;

/// Elements per page
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

#[inline]
fn page_count(size: u64, page_shift: u32) -> usize {
    size.div_ceil(1u64 << page_shift) as usize
}

#[inline]
fn page_len(size: u64, page: usize, page_shift: u32) -> usize {
    let page_size = 1u64 << page_shift;
    let start = page as u64 * page_size;
    (size - start).min(page_size) as usize
}

#[inline]
fn locate(index: u64, page_shift: u32) -> (usize, usize) {
    let mask = (1u64 << page_shift) - 1;
    ((index >> page_shift) as usize, (index & mask) as usize)
}

fn paged_estimation<T>(size: u64) -> u64 {
    let pages = page_count(size, PAGE_SHIFT) as u64;
    size * mem::size_of::<T>() as u64 + pages * mem::size_of::<Box<[T]>>() as u64
}

/// Fixed-size paged array of plain values
#[derive(Debug, Clone)]
pub struct HugeArray<T> {
    pages: Vec<Box<[T]>>,
    size: u64,
    page_shift: u32,
}

/// Paged array of 64-bit integers
pub type HugeLongArray = HugeArray<u64>;

/// Paged array of 32-bit integers
pub type HugeIntArray = HugeArray<u32>;

/// Paged array of doubles
pub type HugeDoubleArray = HugeArray<f64>;

impl<T: Copy + Default> HugeArray<T> {
    /// Allocate `size` default-initialized elements
    pub fn new(size: u64) -> Self {
        Self::with_page_shift(size, PAGE_SHIFT)
    }

    pub(crate) fn with_page_shift(size: u64, page_shift: u32) -> Self {
        let pages = (0..page_count(size, page_shift))
            .map(|page| vec![T::default(); page_len(size, page, page_shift)].into_boxed_slice())
            .collect();

        Self { pages, size, page_shift }
    }

    /// Build an array from a function of the index
    pub fn from_fn(size: u64, f: impl Fn(u64) -> T) -> Self {
        let mut array = Self::new(size);
        for index in 0..size {
            array.set(index, f(index));
        }
        array
    }

    /// Number of logical elements
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn get(&self, index: u64) -> T {
        let (page, offset) = locate(index, self.page_shift);
        self.pages[page][offset]
    }

    #[inline]
    pub fn set(&mut self, index: u64, value: T) {
        let (page, offset) = locate(index, self.page_shift);
        self.pages[page][offset] = value;
    }

    /// Replace the element at `index` by `f(old)`
    #[inline]
    pub fn update(&mut self, index: u64, f: impl FnOnce(T) -> T) {
        let (page, offset) = locate(index, self.page_shift);
        let slot = &mut self.pages[page][offset];
        *slot = f(*slot);
    }

    pub fn fill(&mut self, value: T) {
        for page in &mut self.pages {
            page.fill(value);
        }
    }

    /// Iterate over all elements in index order
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.pages.iter().flat_map(|page| page.iter().copied())
    }

    /// Bytes held by the pages and the page table
    pub fn size_of_bytes(&self) -> u64 {
        paged_estimation::<T>(self.size)
    }

    /// Bytes an array of `size` elements will hold
    pub fn memory_estimation(size: u64) -> u64 {
        paged_estimation::<T>(size)
    }
}

/// Paged array of atomic 64-bit integers supporting concurrent accumulation
#[derive(Debug)]
pub struct HugeAtomicLongArray {
    pages: Vec<Box<[AtomicU64]>>,
    size: u64,
    page_shift: u32,
}

impl HugeAtomicLongArray {
    /// Allocate `size` zeroed slots
    pub fn new(size: u64) -> Self {
        Self::with_page_shift(size, PAGE_SHIFT)
    }

    pub(crate) fn with_page_shift(size: u64, page_shift: u32) -> Self {
        let pages = (0..page_count(size, page_shift))
            .map(|page| {
                (0..page_len(size, page, page_shift))
                    .map(|_| AtomicU64::new(0))
                    .collect::<Vec<_>>()
                    .into_boxed_slice()
            })
            .collect();

        Self { pages, size, page_shift }
    }

    /// Build an array from a function of the index
    pub fn from_fn(size: u64, f: impl Fn(u64) -> u64) -> Self {
        let array = Self::new(size);
        for index in 0..size {
            array.set(index, f(index));
        }
        array
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    fn slot(&self, index: u64) -> &AtomicU64 {
        let (page, offset) = locate(index, self.page_shift);
        &self.pages[page][offset]
    }

    #[inline]
    pub fn get(&self, index: u64) -> u64 {
        self.slot(index).load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, index: u64, value: u64) {
        self.slot(index).store(value, Ordering::Release);
    }

    /// Atomically add `delta`, returning the previous value
    #[inline]
    pub fn get_and_add(&self, index: u64, delta: u64) -> u64 {
        self.slot(index).fetch_add(delta, Ordering::AcqRel)
    }

    /// Store `new` if the slot still holds `expected`
    #[inline]
    pub fn compare_and_set(&self, index: u64, expected: u64, new: u64) -> bool {
        self.slot(index)
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Store `new` if the slot still holds `expected`, returning the witnessed value
    #[inline]
    pub fn compare_and_exchange(&self, index: u64, expected: u64, new: u64) -> u64 {
        match self
            .slot(index)
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(previous) => previous,
            Err(witness) => witness,
        }
    }

    /// Apply `f` in a CAS loop until it wins, returning the new value
    pub fn update(&self, index: u64, f: impl Fn(u64) -> u64) -> u64 {
        let slot = self.slot(index);
        let mut current = slot.load(Ordering::Acquire);
        loop {
            let next = f(current);
            match slot.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return next,
                Err(witness) => current = witness,
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.pages
            .iter()
            .flat_map(|page| page.iter().map(|slot| slot.load(Ordering::Acquire)))
    }

    /// Freeze into a plain array once all writers are done
    pub fn into_huge_array(self) -> HugeLongArray {
        let mut pages = Vec::with_capacity(self.pages.len());
        for page in self.pages {
            let values: Vec<u64> = page.iter().map(|slot| slot.load(Ordering::Acquire)).collect();
            pages.push(values.into_boxed_slice());
        }
        HugeArray {
            pages,
            size: self.size,
            page_shift: self.page_shift,
        }
    }

    pub fn size_of_bytes(&self) -> u64 {
        paged_estimation::<AtomicU64>(self.size)
    }

    pub fn memory_estimation(size: u64) -> u64 {
        paged_estimation::<AtomicU64>(size)
    }
}

/// Paged array of doubles with atomic accumulation through bit-pattern CAS
#[derive(Debug)]
pub struct HugeAtomicDoubleArray {
    bits: HugeAtomicLongArray,
}

impl HugeAtomicDoubleArray {
    /// Allocate `size` slots holding `0.0`
    pub fn new(size: u64) -> Self {
        // 0.0 is the all-zero bit pattern
        Self {
            bits: HugeAtomicLongArray::new(size),
        }
    }

    pub fn size(&self) -> u64 {
        self.bits.size()
    }

    #[inline]
    pub fn get(&self, index: u64) -> f64 {
        f64::from_bits(self.bits.get(index))
    }

    #[inline]
    pub fn set(&self, index: u64, value: f64) {
        self.bits.set(index, value.to_bits());
    }

    /// Atomically add `delta`, returning the previous value
    #[inline]
    pub fn get_and_add(&self, index: u64, delta: f64) -> f64 {
        let mut current = self.bits.get(index);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            let witness = self.bits.compare_and_exchange(index, current, next);
            if witness == current {
                return f64::from_bits(current);
            }
            current = witness;
        }
    }

    /// Freeze into a plain array once all writers are done
    pub fn into_huge_array(self) -> HugeDoubleArray {
        let longs = self.bits.into_huge_array();
        HugeArray {
            pages: longs
                .pages
                .into_iter()
                .map(|page| page.iter().map(|&bits| f64::from_bits(bits)).collect())
                .collect(),
            size: longs.size,
            page_shift: longs.page_shift,
        }
    }

    pub fn size_of_bytes(&self) -> u64 {
        self.bits.size_of_bytes()
    }

    pub fn memory_estimation(size: u64) -> u64 {
        HugeAtomicLongArray::memory_estimation(size)
    }
}
