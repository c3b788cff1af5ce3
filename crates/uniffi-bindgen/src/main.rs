// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

fn main() {
    uniffi::uniffi_bindgen_main()
}
