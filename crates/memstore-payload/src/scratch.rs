use std::cell::RefCell;

use crate::page_set::PageRef;

/// Scratch vectors grown past this many entries are dropped instead of kept.
const MAX_RETAINED_PAGES: usize = 64;

thread_local! {
    static PAGE_SCRATCH: RefCell<Vec<(u64, PageRef)>> = const { RefCell::new(Vec::new()) };
}

/// Run `f` with this thread's reusable page vector.
///
/// The vector is moved out of the thread slot for the duration of the
/// call and put back (emptied) afterwards. A nested call on the same thread
/// finds the slot empty and simply works on a fresh vector, so reuse is an
/// allocation saving only and never shares page references between calls.
pub(crate) fn with_page_scratch<R>(f: impl FnOnce(&mut Vec<(u64, PageRef)>) -> R) -> R {
    let mut pages = PAGE_SCRATCH.with(|slot| std::mem::take(&mut *slot.borrow_mut()));
    let out = f(&mut pages);
    pages.clear();
    if pages.capacity() <= MAX_RETAINED_PAGES {
        PAGE_SCRATCH.with(|slot| *slot.borrow_mut() = pages);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_set::Page;
    use std::sync::Arc;

    #[test]
    fn scratch_is_empty_on_entry_and_reused() {
        with_page_scratch(|pages| {
            assert!(pages.is_empty());
            pages.push((0, Arc::new(Page::zeroed(8))));
        });
        with_page_scratch(|pages| {
            assert!(pages.is_empty());
            assert!(pages.capacity() >= 1);
        });
    }

    #[test]
    fn nested_use_gets_independent_vector() {
        with_page_scratch(|outer| {
            outer.push((0, Arc::new(Page::zeroed(8))));
            with_page_scratch(|inner| {
                assert!(inner.is_empty());
                inner.push((8, Arc::new(Page::zeroed(8))));
            });
            assert_eq!(outer.len(), 1);
            assert_eq!(outer[0].0, 0);
        });
    }

    #[test]
    fn page_refs_are_released_after_call() {
        let page = Arc::new(Page::zeroed(8));
        with_page_scratch(|pages| pages.push((0, Arc::clone(&page))));
        assert_eq!(Arc::strong_count(&page), 1);
    }
}
