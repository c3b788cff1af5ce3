// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

//! C entry points exported by liblokinet.

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_int};

/// Opaque engine context owned by liblokinet.
#[repr(C)]
pub struct llarp_main {
    _private: [u8; 0],
}

pub type llarp_ensure_config = unsafe extern "C" fn(
    fname: *const c_char,
    basedir: *const c_char,
    overwrite: bool,
    as_router: bool,
) -> bool;

pub type llarp_main_init =
    unsafe extern "C" fn(fname: *const c_char, multithreaded: bool) -> *mut llarp_main;

pub type llarp_main_setup = unsafe extern "C" fn(ptr: *mut llarp_main) -> c_int;

pub type llarp_main_run = unsafe extern "C" fn(ptr: *mut llarp_main) -> c_int;

pub type llarp_main_signal = unsafe extern "C" fn(ptr: *mut llarp_main, sig: c_int);

pub type llarp_main_free = unsafe extern "C" fn(ptr: *mut llarp_main);
