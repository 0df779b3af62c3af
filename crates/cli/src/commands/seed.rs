use std::path::Path;

use leadline_db::{DemoSeedDataset, SeedCheck, SeedResult};

use crate::commands::{load_config, open_database, runtime, CommandResult, StepFailure};

pub fn run(config_path: Option<&Path>) -> CommandResult {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let result = runtime().and_then(|runtime| {
        runtime.block_on(async {
            let pool = open_database(&config).await?;
            let outcome = load_and_verify(&pool).await;
            pool.close().await;
            outcome
        })
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

async fn load_and_verify(pool: &leadline_db::DbPool) -> Result<SeedResult, StepFailure> {
    let seeded = DemoSeedDataset::load(pool)
        .await
        .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

    let verification = DemoSeedDataset::verify(pool)
        .await
        .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
    if !verification.passed {
        return Err(("seed_verification", verification_failure(&verification.checks), 6));
    }
    Ok(seeded)
}

fn summary(seeded: &SeedResult) -> String {
    format!(
        "demo dataset loaded: {} tenants ({}), {} listings",
        seeded.tenants.len(),
        seeded.tenants.join(", "),
        seeded.inventory_items
    )
}

fn verification_failure(checks: &[SeedCheck]) -> String {
    let failed = checks
        .iter()
        .filter(|check| !check.passed)
        .map(|check| format!("{} ({})", check.name, check.detail))
        .collect::<Vec<_>>();
    if failed.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use leadline_db::{SeedCheck, SeedResult};

    use super::{summary, verification_failure};

    fn check(name: &str, passed: bool, detail: &str) -> SeedCheck {
        SeedCheck { name: name.to_string(), passed, detail: detail.to_string() }
    }

    #[test]
    fn verification_error_message_targets_failed_checks() {
        let checks = [
            check("tenant:acme-realty", true, "present"),
            check("inventory:acme-realty", false, "4 of 6 listings"),
            check("tenant:globex-homes", false, "missing"),
        ];

        assert_eq!(
            verification_failure(&checks),
            "seed verification failed for checks: inventory:acme-realty (4 of 6 listings), \
             tenant:globex-homes (missing)"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_nothing_failed() {
        let checks = [check("tenant:acme-realty", true, "present")];
        assert_eq!(verification_failure(&checks), "some seed data failed to load");
    }

    #[test]
    fn summary_lists_seeded_tenants() {
        let seeded = SeedResult {
            tenants: vec!["acme-realty".to_string(), "globex-homes".to_string()],
            inventory_items: 8,
        };
        assert_eq!(
            summary(&seeded),
            "demo dataset loaded: 2 tenants (acme-realty, globex-homes), 8 listings"
        );
    }
}
