//! Synthetic SDLC event generator: GitHub, Vercel, Jira and CI events
//! over a small simulated world of users and services.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

use orbitr_protocol::{now_unix, Domain, Severity, StandardizedEvent};

pub const PROJECTS: [&str; 5] = ["frontend-app", "backend-api", "auth-service", "billing-service", "analytics-pipeline"];
pub const ENVIRONMENTS: [&str; 4] = ["production", "staging", "development", "preview"];
pub const BRANCHES: [&str; 5] = ["main", "develop", "feature/user-auth", "hotfix/security-patch", "release/v2.1"];

const USERNAMES: [&str; 24] = [
    "alice.dev", "bob_ops", "carol.sre", "dave-fin", "erin_k", "frank.m", "grace.h", "heidi_w", "ivan.p",
    "judy.q", "mallory.x", "niaj_r", "olivia.t", "peggy_s", "rupert.v", "sybil.l", "trent_o", "victor.b",
    "walter.c", "yolanda.d", "zoe_e", "quinn.f", "uma_g", "xavier.n",
];
const SERVICE_WORDS: [&str; 10] =
    ["orbit", "nova", "cedar", "harbor", "quartz", "falcon", "maple", "summit", "delta", "ember"];
const ROLES: [&str; 4] = ["Admin", "Dev", "SRE", "Finance"];
const TIERS: [&str; 3] = ["Critical", "Standard", "Internal"];

pub const RISKY_USERNAME: &str = "evil_hacker_99";

fn pick<'a, T>(rng: &mut StdRng, items: &'a [T]) -> &'a T {
    &items[rng.gen_range(0..items.len())]
}

fn short_hex(rng: &mut StdRng, len: usize) -> String {
    (0..len).map(|_| format!("{:x}", rng.gen_range(0..16u8))).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserEntity {
    pub user_id: String,
    pub username: String,
    pub role: String,
    pub mfa_enabled: bool,
    /// 0.0 to 1.0, higher is riskier behaviour.
    pub risk_score: f64,
}

impl UserEntity {
    fn generate(rng: &mut StdRng) -> Self {
        let risk: f64 = rng.gen();
        Self {
            user_id: format!("usr_{}", short_hex(rng, 8)),
            username: pick(rng, &USERNAMES).to_string(),
            role: pick(rng, &ROLES).to_string(),
            // Three in four low-risk users have MFA; high-risk users never do.
            mfa_enabled: risk < 0.8 && rng.gen_range(0..4) != 0,
            risk_score: risk,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceEntity {
    pub service_id: String,
    pub name: String,
    pub tier: String,
    pub baseline_cpu: f64,
    pub baseline_memory: f64,
    pub owner_team: String,
}

impl ServiceEntity {
    fn generate(rng: &mut StdRng) -> Self {
        let word = pick(rng, &SERVICE_WORDS);
        let kind = pick(rng, &["api", "worker", "db", "auth"]);
        let team = pick(rng, &SERVICE_WORDS);
        let mut team_name = team.to_string();
        if let Some(first) = team_name.get_mut(..1) {
            first.make_ascii_uppercase();
        }
        Self {
            service_id: format!("svc_{}", short_hex(rng, 8)),
            name: format!("{word}-{kind}"),
            tier: pick(rng, &TIERS).to_string(),
            baseline_cpu: rng.gen_range(10.0..40.0),
            baseline_memory: rng.gen_range(20.0..50.0),
            owner_team: format!("Team-{team_name}"),
        }
    }
}

/// Persistent population of the simulated world. The first user is always
/// the high-risk account without MFA.
#[derive(Debug, Clone)]
pub struct WorldState {
    pub users: Vec<UserEntity>,
    pub services: Vec<ServiceEntity>,
}

impl WorldState {
    pub fn generate(rng: &mut StdRng, num_users: usize, num_services: usize) -> Self {
        let mut users: Vec<UserEntity> = (0..num_users.max(1)).map(|_| UserEntity::generate(rng)).collect();
        let services = (0..num_services.max(1)).map(|_| ServiceEntity::generate(rng)).collect();
        users[0].mfa_enabled = false;
        users[0].risk_score = 0.95;
        users[0].username = RISKY_USERNAME.to_string();
        Self { users, services }
    }
}

/// Weighted random SDLC events: about 15% high severity, 15% process
/// violations, 20% operational noise and 50% routine traffic.
pub struct ScenarioGenerator {
    world: WorldState,
    rng: StdRng,
    event_counter: u64,
}

impl ScenarioGenerator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut rng: StdRng) -> Self {
        let world = WorldState::generate(&mut rng, 20, 5);
        Self { world, rng, event_counter: 0 }
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn generate_random_event(&mut self) -> StandardizedEvent {
        self.event_counter += 1;
        let roll: f64 = self.rng.gen();
        let three = self.rng.gen_range(0..3usize);
        let four = self.rng.gen_range(0..4usize);
        if roll < 0.15 {
            match three {
                0 => self.github_secret_detected(),
                1 => self.github_pr_merged_without_review(),
                _ => self.vercel_deployment_failed_production(),
            }
        } else if roll < 0.30 {
            match three {
                0 => self.jira_ticket_status_mismatch(),
                1 => self.github_force_push_protected(),
                _ => self.cicd_pipeline_failed(),
            }
        } else if roll < 0.50 {
            match three {
                0 => self.vercel_build_timeout(),
                1 => self.cicd_test_failure(),
                _ => self.github_pr_large_diff(),
            }
        } else {
            match four {
                0 => self.github_pr_merged_normal(),
                1 => self.vercel_deployment_success(),
                2 => self.jira_ticket_updated(),
                _ => self.cicd_pipeline_success(),
            }
        }
    }

    fn base_event(&self, event_type: &str, source: &str, severity: Severity, domain: Domain, payload: Value) -> StandardizedEvent {
        let correlation_id = format!("corr_{}_{}", now_unix() as u64, self.event_counter);
        let mut event = StandardizedEvent::new(event_type, source)
            .with_correlation_id(correlation_id)
            .with_severity(severity)
            .with_domain(domain)
            .with_payload(payload);
        event.tags.push("simulation".to_string());
        event
    }

    fn random_user(&mut self) -> UserEntity {
        let idx = self.rng.gen_range(0..self.world.users.len());
        self.world.users[idx].clone()
    }

    fn project(&mut self) -> &'static str {
        *pick(&mut self.rng, &PROJECTS)
    }

    fn frontend_project(&mut self) -> &'static str {
        *pick(&mut self.rng, &PROJECTS[..2])
    }

    fn branch(&mut self) -> &'static str {
        *pick(&mut self.rng, &BRANCHES)
    }

    // ── GitHub ──────────────────────────────────────────────────

    pub fn github_pr_merged_normal(&mut self) -> StandardizedEvent {
        let user = self.random_user();
        let project = self.project();
        let branch = self.branch();
        let payload = json!({
            "user_id": user.user_id,
            "username": user.username,
            "repository": format!("org/{project}"),
            "pr_number": self.rng.gen_range(100..1000),
            "title": "feat: Add user authentication flow",
            "branch": branch,
            "target_branch": "main",
            "files_changed": self.rng.gen_range(2..=15),
            "additions": self.rng.gen_range(50..=500),
            "deletions": self.rng.gen_range(10..=100),
            "reviewers_approved": self.rng.gen_range(1..=3),
            "ci_passed": true,
            "merge_method": "squash",
        });
        self.base_event("PullRequestMerged", "GitHub", Severity::Low, Domain::Unknown, payload)
    }

    pub fn github_pr_merged_without_review(&mut self) -> StandardizedEvent {
        let user = self.random_user();
        let project = self.project();
        let payload = json!({
            "user_id": user.user_id,
            "username": user.username,
            "repository": format!("org/{project}"),
            "pr_number": self.rng.gen_range(100..1000),
            "title": "hotfix: Quick production fix",
            "branch": "hotfix/urgent-fix",
            "target_branch": "main",
            "files_changed": self.rng.gen_range(1..=5),
            "additions": self.rng.gen_range(10..=50),
            "deletions": self.rng.gen_range(0..=20),
            "reviewers_approved": 0,
            "review_bypassed": true,
            "bypass_reason": "Admin override",
            "ci_passed": true,
            "merge_method": "merge",
        });
        self.base_event("PullRequestMerged", "GitHub", Severity::High, Domain::Compliance, payload)
    }

    pub fn github_secret_detected(&mut self) -> StandardizedEvent {
        let user = self.random_user();
        let project = self.project();
        let branch = self.branch();
        let file_path = *pick(&mut self.rng, &["config/settings.py", ".env", "src/config.js", "docker-compose.yml"]);
        let secret_type =
            *pick(&mut self.rng, &["AWS_ACCESS_KEY", "GITHUB_TOKEN", "DATABASE_PASSWORD", "API_KEY", "JWT_SECRET"]);
        let payload = json!({
            "user_id": user.user_id,
            "username": user.username,
            "repository": format!("org/{project}"),
            "commit_sha": short_hex(&mut self.rng, 8),
            "file_path": file_path,
            "secret_type": secret_type,
            "branch": branch,
            "detected_at": now_unix(),
            "auto_revoked": false,
        });
        self.base_event("SecretDetected", "GitHub-SecretScanning", Severity::Critical, Domain::Security, payload)
    }

    pub fn github_force_push_protected(&mut self) -> StandardizedEvent {
        let user = self.random_user();
        let project = self.project();
        let payload = json!({
            "user_id": user.user_id,
            "username": user.username,
            "repository": format!("org/{project}"),
            "branch": "main",
            "blocked": true,
            "reason": "Protected branch - force push not allowed",
        });
        self.base_event("ForcePushAttempt", "GitHub", Severity::Medium, Domain::Security, payload)
    }

    pub fn github_pr_large_diff(&mut self) -> StandardizedEvent {
        let user = self.random_user();
        let project = self.project();
        let payload = json!({
            "user_id": user.user_id,
            "username": user.username,
            "repository": format!("org/{project}"),
            "pr_number": self.rng.gen_range(100..1000),
            "title": "refactor: Major codebase restructure",
            "branch": "feature/major-refactor",
            "target_branch": "develop",
            "files_changed": self.rng.gen_range(50..=200),
            "additions": self.rng.gen_range(2000..=10000),
            "deletions": self.rng.gen_range(1000..=5000),
            "warning": "Large PR - consider splitting",
        });
        self.base_event("PullRequestOpened", "GitHub", Severity::Low, Domain::Unknown, payload)
    }

    // ── Vercel ──────────────────────────────────────────────────

    pub fn vercel_deployment_success(&mut self) -> StandardizedEvent {
        let project = self.frontend_project();
        let env = *pick(&mut self.rng, &ENVIRONMENTS);
        let branch = self.branch();
        let payload = json!({
            "project": project,
            "environment": env,
            "deployment_id": format!("dpl_{}", short_hex(&mut self.rng, 12)),
            "url": format!("https://{project}-{}.vercel.app", &env[..4]),
            "build_time_seconds": self.rng.gen_range(30..=180),
            "git_branch": branch,
            "git_commit": short_hex(&mut self.rng, 8),
        });
        self.base_event("DeploymentSuccess", "Vercel", Severity::Low, Domain::Unknown, payload)
    }

    pub fn vercel_deployment_failed_production(&mut self) -> StandardizedEvent {
        let project = self.frontend_project();
        let error = *pick(
            &mut self.rng,
            &[
                "Build failed: Module not found 'missing-dep'",
                "Environment variable NEXT_PUBLIC_API_URL is not set",
                "TypeScript compilation error in src/pages/index.tsx",
                "Memory limit exceeded during build",
            ],
        );
        let payload = json!({
            "project": project,
            "environment": "production",
            "deployment_id": format!("dpl_{}", short_hex(&mut self.rng, 12)),
            "error_message": error,
            "build_duration_seconds": self.rng.gen_range(60..=300),
            "git_branch": "main",
            "git_commit": short_hex(&mut self.rng, 8),
            "rollback_available": true,
        });
        self.base_event("DeploymentFailed", "Vercel", Severity::High, Domain::Unknown, payload)
    }

    pub fn vercel_build_timeout(&mut self) -> StandardizedEvent {
        let project = self.frontend_project();
        let env = *pick(&mut self.rng, &ENVIRONMENTS);
        let branch = self.branch();
        let payload = json!({
            "project": project,
            "environment": env,
            "deployment_id": format!("dpl_{}", short_hex(&mut self.rng, 12)),
            "timeout_seconds": 900,
            "git_branch": branch,
        });
        self.base_event("BuildTimeout", "Vercel", Severity::Medium, Domain::Unknown, payload)
    }

    // ── Jira ────────────────────────────────────────────────────

    pub fn jira_ticket_updated(&mut self) -> StandardizedEvent {
        let user = self.random_user();
        let statuses = ["To Do", "In Progress", "In Review", "Done"];
        let old_status = *pick(&mut self.rng, &statuses[..3]);
        let new_status = *pick(&mut self.rng, &statuses[1..]);
        let payload = json!({
            "user_id": user.user_id,
            "username": user.username,
            "ticket_id": format!("PROJ-{}", self.rng.gen_range(100..10000)),
            "title": "Implement user authentication",
            "old_status": old_status,
            "new_status": new_status,
            "assignee": user.username,
            "sprint": format!("Sprint {}", self.rng.gen_range(1..=20)),
        });
        self.base_event("TicketUpdated", "Jira", Severity::Low, Domain::Unknown, payload)
    }

    pub fn jira_ticket_status_mismatch(&mut self) -> StandardizedEvent {
        let user = self.random_user();
        let payload = json!({
            "user_id": user.user_id,
            "username": user.username,
            "ticket_id": format!("PROJ-{}", self.rng.gen_range(100..10000)),
            "title": "User authentication feature",
            "current_status": "To Do",
            "expected_status": "Done",
            "violation_type": "PR merged but ticket not moved",
            "linked_pr": format!("org/frontend-app#{}", self.rng.gen_range(100..1000)),
            "pr_merged_at": now_unix() - f64::from(self.rng.gen_range(3600..=86400u32)),
        });
        self.base_event("WorkflowViolation", "Jira-Integration", Severity::Medium, Domain::Compliance, payload)
    }

    // ── CI/CD ───────────────────────────────────────────────────

    pub fn cicd_pipeline_success(&mut self) -> StandardizedEvent {
        let project = self.project();
        let workflow = *pick(&mut self.rng, &["CI", "Build and Test", "Deploy"]);
        let branch = self.branch();
        let coverage: f64 = self.rng.gen_range(75.0..95.0);
        let payload = json!({
            "repository": format!("org/{project}"),
            "workflow_name": workflow,
            "run_id": self.rng.gen_range(1_000_000..10_000_000),
            "status": "success",
            "duration_seconds": self.rng.gen_range(60..=600),
            "branch": branch,
            "tests_passed": self.rng.gen_range(50..=500),
            "tests_failed": 0,
            "coverage_percent": (coverage * 10.0).round() / 10.0,
        });
        self.base_event("PipelineCompleted", "GitHub-Actions", Severity::Low, Domain::Unknown, payload)
    }

    pub fn cicd_pipeline_failed(&mut self) -> StandardizedEvent {
        let project = self.project();
        let workflow = *pick(&mut self.rng, &["CI", "Build and Test", "Deploy"]);
        let reason = *pick(
            &mut self.rng,
            &[
                "Test suite failed: 3 tests failing",
                "Lint errors detected",
                "Docker build failed",
                "Deployment authorization failed",
            ],
        );
        let branch = self.branch();
        let payload = json!({
            "repository": format!("org/{project}"),
            "workflow_name": workflow,
            "run_id": self.rng.gen_range(1_000_000..10_000_000),
            "status": "failure",
            "failure_reason": reason,
            "duration_seconds": self.rng.gen_range(30..=300),
            "branch": branch,
            "tests_passed": self.rng.gen_range(40..=100),
            "tests_failed": self.rng.gen_range(1..=10),
        });
        self.base_event("PipelineFailed", "GitHub-Actions", Severity::Medium, Domain::Unknown, payload)
    }

    pub fn cicd_test_failure(&mut self) -> StandardizedEvent {
        let project = self.project();
        let branch = self.branch();
        let failed: Vec<&str> = ["test_user_authentication", "test_api_rate_limiting"]
            .into_iter()
            .take(self.rng.gen_range(1..=2))
            .collect();
        let coverage: f64 = self.rng.gen_range(60.0..85.0);
        let payload = json!({
            "repository": format!("org/{project}"),
            "workflow_name": "Test Suite",
            "run_id": self.rng.gen_range(1_000_000..10_000_000),
            "branch": branch,
            "failed_tests": failed,
            "total_tests": self.rng.gen_range(100..=500),
            "coverage_percent": (coverage * 10.0).round() / 10.0,
        });
        self.base_event("TestFailure", "GitHub-Actions", Severity::Low, Domain::Unknown, payload)
    }
}

impl Default for ScenarioGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_always_has_the_risky_user() {
        let generator = ScenarioGenerator::seeded(7);
        let world = generator.world();
        assert_eq!(world.users.len(), 20);
        assert_eq!(world.services.len(), 5);
        assert_eq!(world.users[0].username, RISKY_USERNAME);
        assert!(!world.users[0].mfa_enabled);
        assert_eq!(world.users[0].risk_score, 0.95);
    }

    #[test]
    fn test_generated_events_are_valid() {
        let mut generator = ScenarioGenerator::seeded(42);
        for _ in 0..200 {
            let event = generator.generate_random_event();
            assert!(event.validate().is_ok(), "invalid event: {event:?}");
            assert!(event.correlation_id.starts_with("corr_"));
            assert!(event.tags.contains(&"simulation".to_string()));
        }
    }

    #[test]
    fn test_distribution_is_mostly_routine() {
        let mut generator = ScenarioGenerator::seeded(1);
        let low = (0..1000)
            .map(|_| generator.generate_random_event())
            .filter(|e| e.severity == Severity::Low)
            .count();
        // Routine traffic (50%) plus two of the three operational generators are Low.
        assert!((500..900).contains(&low), "low-severity share out of range: {low}");
    }

    #[test]
    fn test_secret_detection_payload() {
        let mut generator = ScenarioGenerator::seeded(3);
        let event = generator.github_secret_detected();
        assert_eq!(event.severity, Severity::Critical);
        assert_eq!(event.domain, Domain::Security);
        assert_eq!(event.payload_str("commit_sha").map(str::len), Some(8));
        assert_eq!(event.payload_bool("auto_revoked"), Some(false));
        assert!(event.actor_hint().is_some(), "secret events name the committer");
    }

    #[test]
    fn test_service_names_are_word_and_kind() {
        let generator = ScenarioGenerator::seeded(9);
        for service in &generator.world().services {
            assert!(service.name.contains('-'), "name: {}", service.name);
            assert!(service.owner_team.starts_with("Team-"));
            assert!((10.0..40.0).contains(&service.baseline_cpu));
        }
    }
}
