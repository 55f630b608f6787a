//! Inserts the demo portal accounts, two per role. Accounts whose email is
//! already registered are left untouched.

use healthclaim_auth::auth::{dto::RegisterRequest, services};
use healthclaim_auth::state::AppState;
use serde_json::{json, Value};

struct DemoUser {
    email: &'static str,
    password: &'static str,
    name: &'static str,
    role: &'static str,
    profile: Value,
}

fn demo_users() -> Vec<DemoUser> {
    vec![
        DemoUser {
            email: "patient@demo.com",
            password: "demo123",
            name: "John Smith",
            role: "patient",
            profile: json!({
                "firstName": "John",
                "lastName": "Smith",
                "dateOfBirth": "1985-03-15",
                "phone": "(555) 123-4567",
                "address": "123 Main St, Anytown, ST 12345",
                "memberId": "MEM123456789",
                "groupNumber": "GRP001",
                "insuranceProvider": "HealthPlus Insurance",
                "planType": "Premium Care Plan",
                "effectiveDate": "2024-01-01",
                "copay": "$25",
                "deductible": "$1,500",
                "outOfPocketMax": "$5,000"
            }),
        },
        DemoUser {
            email: "jane.doe@example.com",
            password: "patient123",
            name: "Jane Doe",
            role: "patient",
            profile: json!({
                "firstName": "Jane",
                "lastName": "Doe",
                "dateOfBirth": "1990-07-22",
                "phone": "(555) 987-6543",
                "address": "456 Oak Ave, Springfield, ST 67890",
                "memberId": "MEM987654321",
                "groupNumber": "GRP002",
                "insuranceProvider": "MediCare Plus",
                "planType": "Standard Plan",
                "effectiveDate": "2024-02-15",
                "copay": "$30",
                "deductible": "$2,000",
                "outOfPocketMax": "$6,500"
            }),
        },
        DemoUser {
            email: "provider@demo.com",
            password: "provider123",
            name: "Dr. Sarah Wilson",
            role: "provider",
            profile: json!({
                "firstName": "Dr. Sarah",
                "lastName": "Wilson",
                "specialty": "Internal Medicine",
                "licenseNumber": "MD12345",
                "npiNumber": "1234567890",
                "clinic": "Central Medical Center",
                "address": "789 Medical Plaza, Healthcare City, ST 11111",
                "phone": "(555) 246-8100",
                "fax": "(555) 246-8101",
                "yearsExperience": 15,
                "boardCertified": true
            }),
        },
        DemoUser {
            email: "dr.johnson@healthcenter.com",
            password: "health123",
            name: "Dr. Michael Johnson",
            role: "provider",
            profile: json!({
                "firstName": "Dr. Michael",
                "lastName": "Johnson",
                "specialty": "Cardiology",
                "licenseNumber": "MD67890",
                "npiNumber": "0987654321",
                "clinic": "Heart Health Institute",
                "address": "321 Cardiac Way, Wellness Town, ST 22222",
                "phone": "(555) 369-2580",
                "fax": "(555) 369-2581",
                "yearsExperience": 20,
                "boardCertified": true
            }),
        },
        DemoUser {
            email: "payor@demo.com",
            password: "payor123",
            name: "Lisa Thompson",
            role: "payor",
            profile: json!({
                "firstName": "Lisa",
                "lastName": "Thompson",
                "title": "Claims Administrator",
                "department": "Claims Processing",
                "company": "HealthPlus Insurance",
                "employeeId": "EMP789012",
                "phone": "(555) 147-2583",
                "extension": "1205",
                "address": "999 Insurance Blvd, Coverage City, ST 33333",
                "region": "Northeast",
                "authority": "Senior Claims Reviewer"
            }),
        },
        DemoUser {
            email: "admin@insurance.com",
            password: "insurance123",
            name: "Robert Chen",
            role: "payor",
            profile: json!({
                "firstName": "Robert",
                "lastName": "Chen",
                "title": "Senior Underwriter",
                "department": "Risk Assessment",
                "company": "MediCare Plus",
                "employeeId": "EMP456789",
                "phone": "(555) 789-4561",
                "extension": "2108",
                "address": "777 Underwriter St, Policy Town, ST 44444",
                "region": "Southwest",
                "authority": "Policy Authorization"
            }),
        },
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "healthclaim_auth=info,healthclaim_seed=info".to_string());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let state = AppState::init().await?;
    let store = state.store.as_ref();

    let mut created = 0usize;
    for demo in demo_users() {
        if store.find_by_email(demo.email).await?.is_some() {
            tracing::info!(email = demo.email, "already registered; skipping");
            continue;
        }
        let user = services::register(
            store,
            RegisterRequest {
                email: demo.email.into(),
                password: demo.password.into(),
                name: demo.name.into(),
                role: demo.role.into(),
                profile: demo.profile,
            },
        )
        .await?;
        tracing::info!(email = %user.email, role = %user.role(), "seeded");
        created += 1;
    }

    tracing::info!(created, "seeding finished");
    store.close().await;
    Ok(())
}
