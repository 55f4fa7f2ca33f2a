// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::config::MAX_MODULES;
use crate::ModuleId;
use std::fmt;

/// Set of module ids `0..128`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModuleMask(u128);

impl ModuleMask {
    pub const EMPTY: Self = Self(0);

    /// Modules `0..n` (saturates at 128).
    #[must_use]
    pub const fn first_n(n: usize) -> Self {
        if n >= MAX_MODULES {
            Self(u128::MAX)
        } else {
            Self((1u128 << n) - 1)
        }
    }

    /// Mask of the listed modules. Ids of 128 and above are ignored.
    #[must_use]
    pub fn from_modules(modules: impl IntoIterator<Item = ModuleId>) -> Self {
        let mut mask = Self::EMPTY;
        for module in modules {
            mask.insert(module);
        }
        mask
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u128) -> Self {
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> u128 {
        self.0
    }

    #[inline]
    #[must_use]
    pub fn contains(self, module: ModuleId) -> bool {
        (module as usize) < MAX_MODULES && self.0 & (1u128 << module) != 0
    }

    /// Add `module`. Returns false if it was already present or out of range.
    #[inline]
    pub fn insert(&mut self, module: ModuleId) -> bool {
        if (module as usize) >= MAX_MODULES || self.contains(module) {
            return false;
        }
        self.0 |= 1u128 << module;
        true
    }

    /// Remove `module`. Returns false if it was not present.
    #[inline]
    pub fn clear(&mut self, module: ModuleId) -> bool {
        if !self.contains(module) {
            return false;
        }
        self.0 &= !(1u128 << module);
        true
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    #[must_use]
    pub const fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Position of `module` among the members, in id order.
    ///
    /// Used to place sparse module tiles contiguously in an image.
    #[must_use]
    pub fn rank(self, module: ModuleId) -> Option<usize> {
        if !self.contains(module) {
            return None;
        }
        let below = self.0 & ((1u128 << module) - 1);
        Some(below.count_ones() as usize)
    }

    /// Member ids in ascending order.
    pub fn iter(self) -> impl Iterator<Item = ModuleId> {
        (0..MAX_MODULES as ModuleId).filter(move |&m| self.contains(m))
    }
}

impl fmt::Debug for ModuleMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
