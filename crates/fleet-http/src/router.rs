//! URL routing for the non-RPC HTTP surface (spec §4.4's routing table).
//!
//! The RPC-upgrade paths (`/` and `/environment/{uuid}/api`) are not routed
//! here — they belong to `fleet-transport`'s accept loop, which inspects the
//! very first bytes on a connection to decide whether to hand it to the
//! framed RPC codec or to this router. This module only covers the four
//! paths that are genuinely plain HTTP request/response (or upload/download)
//! exchanges.

/// The side-channel endpoint a request path resolves to, already stripped
/// of its `/environment/{uuid}` prefix when one was present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Log,
    Charms,
    Tools,
    Backup,
}

/// Resolve `path` against spec §4.4's table. `environment_uuid` is this
/// server's own environment id; a request naming a *different* uuid is
/// rejected as not-found, same as an entirely unknown path.
pub fn route(path: &str, environment_uuid: &str) -> Option<Route> {
    if let Some(rest) = path.strip_prefix("/environment/") {
        let (uuid, suffix) = rest.split_once('/')?;
        if uuid != environment_uuid {
            return None;
        }
        return match suffix {
            "log" => Some(Route::Log),
            "charms" => Some(Route::Charms),
            "tools" => Some(Route::Tools),
            _ => None,
        };
    }

    match path {
        "/log" => Some(Route::Log),
        "/charms" => Some(Route::Charms),
        "/tools" => Some(Route::Tools),
        "/backup" => Some(Route::Backup),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_environment_scoped_and_legacy_paths_alike() {
        assert_eq!(route("/environment/abc/log", "abc"), Some(Route::Log));
        assert_eq!(route("/log", "abc"), Some(Route::Log));
        assert_eq!(route("/environment/abc/charms", "abc"), Some(Route::Charms));
        assert_eq!(route("/charms", "abc"), Some(Route::Charms));
        assert_eq!(route("/environment/abc/tools", "abc"), Some(Route::Tools));
        assert_eq!(route("/tools", "abc"), Some(Route::Tools));
        assert_eq!(route("/backup", "abc"), Some(Route::Backup));
    }

    #[test]
    fn rejects_a_mismatched_environment_uuid() {
        assert_eq!(route("/environment/other/log", "abc"), None);
    }

    #[test]
    fn rejects_unknown_paths() {
        assert_eq!(route("/nope", "abc"), None);
        assert_eq!(route("/environment/abc/nope", "abc"), None);
    }
}
