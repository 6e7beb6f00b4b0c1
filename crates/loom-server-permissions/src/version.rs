// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Build information for loom-permissions.

/// Format version info for display.
pub fn format_version_info() -> String {
	format!(
		"loom-permissions version: {}\n\
         Platform:                 {}-{}\n\
         Policy model:             sub, obj, act, eft, id",
		env!("CARGO_PKG_VERSION"),
		std::env::consts::ARCH,
		std::env::consts::OS,
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_version_info_names_the_binary() {
		let info = format_version_info();
		assert!(info.starts_with("loom-permissions version: "));
		assert!(info.contains(env!("CARGO_PKG_VERSION")));
	}
}
