//! Property-based tests for configuration module
//!
//! These tests use proptest to generate random configurations and verify
//! validation invariants and serialization round-trips.

use super::*;
use proptest::prelude::*;

prop_compose! {
    fn valid_display_config()(
        builtin in 1usize..4,
        pluggable in 0usize..4,
        virtual_displays in 0usize..3,
        async_power_mode in any::<bool>(),
    )(
        builtin in Just(builtin),
        pluggable in Just(pluggable),
        virtual_displays in Just(virtual_displays),
        max_virtual_displays in 0u32..=(virtual_displays as u32),
        async_power_mode in Just(async_power_mode),
    ) -> DisplayConfig {
        DisplayConfig {
            builtin,
            pluggable,
            virtual_displays,
            max_virtual_displays,
            async_power_mode,
        }
    }
}

prop_compose! {
    fn valid_timeout_config()(
        external_connection_ms in 50u64..2000,
        enumeration_poll_ms in 1u64..50,
        vm_release_interval_ms in 1u64..500,
        vm_release_retries in 1u32..10,
        commit_done_interval_ms in 1u64..500,
        commit_done_retries in 1u32..10,
        client_hotplug_wait_ms in 0u64..10_000,
        power_transition_ms in 1u64..5000,
        cwb_completion_ms in 1u64..5000,
    ) -> TimeoutConfig {
        TimeoutConfig {
            external_connection_ms,
            enumeration_poll_ms,
            vm_release_interval_ms,
            vm_release_retries,
            commit_done_interval_ms,
            commit_done_retries,
            client_hotplug_wait_ms,
            power_transition_ms,
            cwb_completion_ms,
        }
    }
}

prop_compose! {
    fn valid_session_config()(
        display in valid_display_config(),
        timeouts in valid_timeout_config(),
        debug in any::<bool>(),
        idle_timeout_ms in 0u32..10_000,
    ) -> SessionConfig {
        SessionConfig {
            display,
            timeouts,
            general: GeneralConfig {
                debug,
                idle_timeout_ms,
                null_display_mode: true,
            },
        }
    }
}

proptest! {
    #[test]
    fn test_generated_configs_validate(config in valid_session_config()) {
        prop_assert!(config.validate().is_ok());
        prop_assert!(config.display.layout().total() <= MAX_DISPLAYS);
    }

    #[test]
    fn test_config_toml_roundtrip(config in valid_session_config()) {
        let toml_string = toml::to_string(&config).unwrap();
        let parsed: SessionConfig = toml::from_str(&toml_string).unwrap();
        prop_assert_eq!(parsed, config);
    }

    #[test]
    fn test_zero_retries_never_validate(
        config in valid_session_config(),
        which in any::<bool>(),
    ) {
        let mut config = config;
        if which {
            config.timeouts.vm_release_retries = 0;
        } else {
            config.timeouts.commit_done_retries = 0;
        }
        prop_assert!(config.validate().is_err());
    }
}
