// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

use vergen::EmitBuilder;

fn main() {
    EmitBuilder::builder()
        .all_build()
        .all_git()
        .emit()
        .expect("failed to extract build metadata");
}
