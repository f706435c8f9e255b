// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Handles to memory-mapped register blocks.

use core::ops::Deref;

/// A pointer to a register block (or other statically allocated data) that
/// lives for the whole program.
///
/// Constructing a `StaticRef` is the one unsafe step; every later access is
/// an ordinary shared borrow of `T`. Register types from `tock-registers`
/// provide the interior mutability.
#[derive(Debug)]
pub struct StaticRef<T> {
    ptr: *const T,
}

impl<T> StaticRef<T> {
    /// Create a new `StaticRef` from a raw pointer.
    ///
    /// ## Safety
    ///
    /// `ptr` must be aligned, non-null, and point to a `T` that stays valid
    /// for the rest of the program.
    pub const unsafe fn new(ptr: *const T) -> StaticRef<T> {
        StaticRef { ptr }
    }

    /// The address this reference points to.
    pub fn as_ptr(&self) -> *const T {
        self.ptr
    }
}

impl<T> Clone for StaticRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StaticRef<T> {}

impl<T> Deref for StaticRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: upheld by the contract of `StaticRef::new`.
        unsafe { &*self.ptr }
    }
}
