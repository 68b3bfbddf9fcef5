//! Unit tests for the MachineDriver reconciler

#[cfg(test)]
mod tests {
    use crate::reconciler::Outcome;
    use crate::test_utils::*;
    use machine_crds::machine_driver::reason;
    use machine_crds::{get_condition, ConditionStatus, MachineDriver, MachineDriverConditionType};

    async fn reconcile(env: &TestEnv, name: &str) -> MachineDriver {
        let driver = env.driver(name);
        assert_eq!(
            env.reconciler.reconcile_machine_driver(&driver).await.unwrap(),
            Outcome::Steady
        );
        env.driver(name)
    }

    fn status_of(driver: &MachineDriver, type_: MachineDriverConditionType) -> (ConditionStatus, String) {
        let condition = get_condition(driver, &type_).unwrap();
        (condition.status, condition.reason.clone())
    }

    #[tokio::test]
    async fn test_valid_active_driver() {
        let env = TestEnv::new();
        env.drivers.insert(test_driver("amazonec2", true));

        let driver = reconcile(&env, "amazonec2").await;
        assert!(driver.is_validated());
        assert_eq!(status_of(&driver, MachineDriverConditionType::Active).0, ConditionStatus::True);
    }

    #[tokio::test]
    async fn test_builtin_driver_needs_no_url() {
        let env = TestEnv::new();
        env.drivers.insert(test_builtin_driver("vmwarevsphere"));

        let driver = reconcile(&env, "vmwarevsphere").await;
        assert!(driver.is_validated());
    }

    #[tokio::test]
    async fn test_invalid_source_is_false_with_message() {
        let env = TestEnv::new();
        let mut driver = test_driver("custom", true);
        driver.spec.url = "ftp://mirror.example.com/driver".to_string();
        env.drivers.insert(driver);

        let driver = reconcile(&env, "custom").await;
        let validated = get_condition(&driver, &MachineDriverConditionType::Validated).unwrap();
        assert_eq!(validated.status, ConditionStatus::False);
        assert_eq!(validated.reason, reason::INVALID_SOURCE);
        assert!(validated.message.as_deref().unwrap().contains("ftp://"));
    }

    #[tokio::test]
    async fn test_active_mirrors_spec() {
        let env = TestEnv::new();
        env.drivers.insert(test_driver("amazonec2", true));
        reconcile(&env, "amazonec2").await;

        let mut driver = env.driver("amazonec2");
        driver.spec.active = false;
        env.drivers.insert(driver);

        let driver = reconcile(&env, "amazonec2").await;
        assert_eq!(
            status_of(&driver, MachineDriverConditionType::Active),
            (ConditionStatus::False, reason::DEACTIVATED.to_string())
        );
        // Validation is independent of activation
        assert!(driver.is_validated());
    }

    #[tokio::test]
    async fn test_unchanged_driver_is_not_rewritten() {
        let env = TestEnv::new();
        env.drivers.insert(test_driver("amazonec2", true));
        reconcile(&env, "amazonec2").await;
        let writes = env.drivers.status_writes();

        reconcile(&env, "amazonec2").await;
        assert_eq!(env.drivers.status_writes(), writes);
    }

    #[tokio::test]
    async fn test_deleting_driver_is_skipped() {
        let env = TestEnv::new();
        env.drivers.insert(test_driver("amazonec2", true));
        env.drivers.mark_deleting(None, "amazonec2").unwrap();

        let driver = reconcile(&env, "amazonec2").await;
        assert!(driver.status.is_none());
    }
}
