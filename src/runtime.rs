//! Fixed client-side payloads delivered by the proxy.
//!
//! The runtime patch installs interception for history navigation, network
//! calls, and image/canvas/media resource loads so that runtime-generated
//! URLs also flow through the proxy. The core's obligation ends at embedding
//! and parameterizing these blobs; their execution happens in the browser.

use crate::config::OverlayConfig;

/// History/network/canvas interception, injected into every document head.
pub const RUNTIME_PATCH: &str = include_str!("runtime/patch.js");

/// Error/diagnostics bootstrap, injected before everything else.
pub const DIAGNOSTICS_BOOTSTRAP: &str = include_str!("runtime/diagnostics.js");

/// Console helper for inspecting proxy state from devtools.
pub const DEBUG_HELPER: &str = include_str!("runtime/debug.js");

const OVERLAY_TEMPLATE: &str = include_str!("runtime/overlay.js");

/// Render the content-replacement overlay with its configured defaults.
pub fn overlay_script(config: &OverlayConfig) -> String {
    OVERLAY_TEMPLATE
        .replace("__DEFAULT_XPATH__", &config.default_xpath)
        .replace("__DEFAULT_DELAY__", &config.default_delay_ms.to_string())
        .replace("__DEFAULT_TRIES__", &config.default_tries.to_string())
        .replace("__DEFAULT_INTERVAL__", &config.default_interval_ms.to_string())
}
