#[cfg(feature = "loom")]
mod imp {
    pub(crate) use loom::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Condvar, Mutex, MutexGuard,
        },
        thread,
    };
    pub(crate) use std::sync::Arc;
}

#[cfg(not(feature = "loom"))]
mod imp {
    pub(crate) use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc, Condvar, Mutex, MutexGuard,
        },
        thread,
    };
}

pub(crate) use imp::*;
