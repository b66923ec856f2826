// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use k3s_deploy_lib::{
        error::{Error, Result},
        version::{self, ReleaseSource},
    };

    struct FixedRelease(Option<&'static str>);

    impl ReleaseSource for FixedRelease {
        fn latest(&self) -> Result<String> {
            match self.0 {
                Some(tag) => Ok(tag.to_string()),
                None => Err(Error::provider_with_detail(
                    "failed to fetch latest release",
                    "timed out",
                )),
            }
        }
    }

    #[test]
    fn same_version_does_not_prompt() {
        let asked = Cell::new(false);
        let chosen = version::check(&FixedRelease(Some("v1.32.4+k3s1")), "v1.32.4+k3s1", true, |_| {
            asked.set(true);
            Some("y".to_string())
        });
        assert_eq!(chosen, "v1.32.4+k3s1");
        assert!(!asked.get());
    }

    #[test]
    fn lookup_failure_keeps_current() {
        let chosen = version::check(&FixedRelease(None), "v1.32.4+k3s1", true, |_| {
            panic!("must not prompt when the lookup failed")
        });
        assert_eq!(chosen, "v1.32.4+k3s1");
    }

    #[test]
    fn newer_release_without_update_flag_keeps_current() {
        let chosen = version::check(&FixedRelease(Some("v1.33.0+k3s1")), "v1.32.4+k3s1", false, |_| {
            panic!("must not prompt without the update flag")
        });
        assert_eq!(chosen, "v1.32.4+k3s1");
    }

    #[test]
    fn newer_release_follows_the_answer() {
        let source = FixedRelease(Some("v1.33.0+k3s1"));

        let chosen = version::check(&source, "v1.32.4+k3s1", true, |latest| {
            assert_eq!(latest, "v1.33.0+k3s1");
            Some("yes\n".to_string())
        });
        assert_eq!(chosen, "v1.33.0+k3s1");

        let chosen = version::check(&source, "v1.32.4+k3s1", true, |_| Some("n\n".to_string()));
        assert_eq!(chosen, "v1.32.4+k3s1");

        let chosen = version::check(&source, "v1.32.4+k3s1", true, |_| None);
        assert_eq!(chosen, "v1.32.4+k3s1");
    }
}
