
pub(crate) mod outbound_queue;
pub(crate) mod ulp_queue;
