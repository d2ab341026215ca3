pub mod key_generator;

use std::any::Any;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Atomic supporting storing and loading of an f32, via the raw bits of a u32.
pub struct AtomicF32 {
    inner: AtomicU32,
}
impl AtomicF32 {
    pub fn new(v: f32) -> Self {
        Self {
            inner: AtomicU32::new(v.to_bits()),
        }
    }

    pub fn store(&self, val: f32, order: Ordering) {
        self.inner.store(val.to_bits(), order);
    }

    pub fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.inner.load(order))
    }
}
impl Debug for AtomicF32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.load(Ordering::SeqCst), f)
    }
}

/// Atomic supporting storing and loading of an f64, via the raw bits of a u64.
pub struct AtomicF64 {
    inner: AtomicU64,
}
impl AtomicF64 {
    pub fn new(v: f64) -> Self {
        Self {
            inner: AtomicU64::new(v.to_bits()),
        }
    }

    pub fn store(&self, val: f64, order: Ordering) {
        self.inner.store(val.to_bits(), order);
    }

    pub fn load(&self, order: Ordering) -> f64 {
        f64::from_bits(self.inner.load(order))
    }
}
impl Debug for AtomicF64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.load(Ordering::SeqCst), f)
    }
}

/// Extract the message from a caught panic payload.
pub fn panic_msg(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "Unknown panic"
    }
}

/// Convert decibels to linear gain.
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_f64_round_trip() {
        let a = AtomicF64::new(120.5);
        assert_eq!(a.load(Ordering::Relaxed), 120.5);
        a.store(-3.25, Ordering::Relaxed);
        assert_eq!(a.load(Ordering::Relaxed), -3.25);
    }

    #[test]
    fn unity_at_zero_db() {
        assert_eq!(db_to_gain(0.0), 1.0);
        assert!((db_to_gain(-6.0) - 0.501_187).abs() < 1e-5);
    }

    #[test]
    fn panic_message_from_string() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("boom"));
        assert_eq!(panic_msg(payload.as_ref()), "boom");
    }
}
