use portable_atomic::AtomicU64;
use std::sync::atomic::Ordering;

#[derive(Default, Debug)]
pub struct AssociationStats {
    n_datas: AtomicU64,
    n_sacks: AtomicU64,
    n_t3timeouts: AtomicU64,
    n_ack_timeouts: AtomicU64,
    n_dup_tsns: AtomicU64,
    n_big_gaps: AtomicU64,
    n_bad_tags: AtomicU64,
    n_ecne_reductions: AtomicU64,
}

impl AssociationStats {
    pub(crate) fn inc_datas(&self) {
        self.n_datas.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get_num_datas(&self) -> u64 {
        self.n_datas.load(Ordering::SeqCst)
    }

    pub(crate) fn inc_sacks(&self) {
        self.n_sacks.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get_num_sacks(&self) -> u64 {
        self.n_sacks.load(Ordering::SeqCst)
    }

    pub(crate) fn inc_t3timeouts(&self) {
        self.n_t3timeouts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get_num_t3timeouts(&self) -> u64 {
        self.n_t3timeouts.load(Ordering::SeqCst)
    }

    pub(crate) fn inc_ack_timeouts(&self) {
        self.n_ack_timeouts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get_num_ack_timeouts(&self) -> u64 {
        self.n_ack_timeouts.load(Ordering::SeqCst)
    }

    pub(crate) fn inc_dup_tsns(&self) {
        self.n_dup_tsns.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get_num_dup_tsns(&self) -> u64 {
        self.n_dup_tsns.load(Ordering::SeqCst)
    }

    pub(crate) fn inc_big_gaps(&self) {
        self.n_big_gaps.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get_num_big_gaps(&self) -> u64 {
        self.n_big_gaps.load(Ordering::SeqCst)
    }

    pub(crate) fn inc_bad_tags(&self) {
        self.n_bad_tags.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get_num_bad_tags(&self) -> u64 {
        self.n_bad_tags.load(Ordering::SeqCst)
    }

    pub(crate) fn inc_ecne_reductions(&self) {
        self.n_ecne_reductions.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get_num_ecne_reductions(&self) -> u64 {
        self.n_ecne_reductions.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.n_datas.store(0, Ordering::SeqCst);
        self.n_sacks.store(0, Ordering::SeqCst);
        self.n_t3timeouts.store(0, Ordering::SeqCst);
        self.n_ack_timeouts.store(0, Ordering::SeqCst);
        self.n_dup_tsns.store(0, Ordering::SeqCst);
        self.n_big_gaps.store(0, Ordering::SeqCst);
        self.n_bad_tags.store(0, Ordering::SeqCst);
        self.n_ecne_reductions.store(0, Ordering::SeqCst);
    }
}
