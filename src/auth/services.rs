//! Credential store operations.
//!
//! Every write goes through the same ordered steps: the input is validated
//! into typed values, the password is hashed if it changed, then the record
//! is persisted. Nothing is written unless every step before it succeeded.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::{
    claims::Claims,
    dto::RegisterRequest,
    jwt::JwtKeys,
    password::{hash_password, verify_password, MIN_PASSWORD_LEN},
    profile::{Profile, ProfileError},
    repo::UserStore,
    repo_types::{Role, User},
};
use crate::error::AppError;

lazy_static! {
    // `\w` restricted to ASCII word characters.
    static ref EMAIL_RE: Regex = Regex::new(
        r"^(?-u:\w)+([.-]?(?-u:\w)+)*@(?-u:\w)+([.-]?(?-u:\w)+)*(\.(?-u:\w){2,3})+$"
    )
    .expect("email regex");
    // Verified against when no account matches, so unknown emails cost the
    // same as wrong passwords.
    static ref DUMMY_HASH: Option<String> = hash_password("healthclaim-dummy-password").ok();
}

impl From<ProfileError> for AppError {
    fn from(e: ProfileError) -> Self {
        AppError::Validation(e.to_string())
    }
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Name is required".into()));
    }
    Ok(name.to_string())
}

/// Registration input after validation; password still in clear.
#[derive(Debug)]
pub struct ValidRegistration {
    pub email: String,
    pub password: String,
    pub name: String,
    pub profile: Profile,
}

pub fn validate_registration(req: RegisterRequest) -> Result<ValidRegistration, AppError> {
    let email = normalize_email(&req.email);
    if email.is_empty() {
        return Err(AppError::Validation("Email is required".into()));
    }
    if !is_valid_email(&email) {
        return Err(AppError::Validation("Please enter a valid email".into()));
    }
    validate_password(&req.password)?;
    let name = validate_name(&req.name)?;
    let role = req
        .role
        .parse::<Role>()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let profile = Profile::from_input(role, req.profile)?;

    Ok(ValidRegistration {
        email,
        password: req.password,
        name,
        profile,
    })
}

fn hash_if_changed(user: &mut User, new_password: Option<&str>) -> Result<(), AppError> {
    if let Some(plain) = new_password {
        user.password_hash = hash_password(plain).map_err(|e| {
            error!(error = %e, "hash_password failed");
            AppError::Internal(e.to_string())
        })?;
    }
    Ok(())
}

/// What a save writes: a new record, or only the columns that changed.
enum Persist {
    Insert,
    Details,
    Password,
}

/// Final steps of the write pipeline for an already validated user.
async fn save(
    store: &dyn UserStore,
    mut user: User,
    new_password: Option<&str>,
    mode: Persist,
) -> Result<User, AppError> {
    if let Some(plain) = new_password {
        validate_password(plain)?;
    }
    hash_if_changed(&mut user, new_password)?;
    user.updated_at = OffsetDateTime::now_utc();
    match mode {
        Persist::Insert => store.insert(&user).await?,
        Persist::Details => store.update_details(&user).await?,
        Persist::Password => {
            store
                .update_password(user.id, &user.password_hash, user.updated_at)
                .await?
        }
    }
    Ok(user)
}

/// Creates a user. Rejects duplicates of `email` or of the role's profile
/// identifiers, and any missing required profile field.
pub async fn register(store: &dyn UserStore, req: RegisterRequest) -> Result<User, AppError> {
    let valid = validate_registration(req)?;

    if store.find_by_email(&valid.email).await?.is_some() {
        warn!(email = %valid.email, "email already registered");
        return Err(AppError::Validation("Email already registered".into()));
    }

    let now = OffsetDateTime::now_utc();
    let user = User {
        id: Uuid::new_v4(),
        email: valid.email,
        password_hash: String::new(),
        name: valid.name,
        profile: valid.profile,
        is_active: true,
        last_login: None,
        created_at: now,
        updated_at: now,
    };
    let user = save(store, user, Some(&valid.password), Persist::Insert).await?;
    info!(user_id = %user.id, role = %user.role(), "user registered");
    Ok(user)
}

/// Authenticates against the active record for `(email, role)`. Every kind
/// of mismatch produces the same error.
pub async fn login(
    store: &dyn UserStore,
    keys: &JwtKeys,
    email: &str,
    password: &str,
    role: &str,
) -> Result<(String, User), AppError> {
    let email = normalize_email(email);
    if email.is_empty() || password.is_empty() || role.trim().is_empty() {
        return Err(AppError::Validation(
            "Please provide email, password, and role".into(),
        ));
    }

    let found = match role.parse::<Role>() {
        Ok(role) => store.find_active_by_email_and_role(&email, role).await?,
        Err(_) => None,
    };

    let Some(mut user) = found else {
        if let Some(dummy) = DUMMY_HASH.as_ref() {
            let _ = verify_password(password, dummy);
        }
        warn!(email = %email, "login without matching active account");
        return Err(AppError::invalid_credentials());
    };

    let ok = verify_password(password, &user.password_hash).map_err(|e| {
        error!(error = %e, user_id = %user.id, "stored password hash unreadable");
        AppError::Internal(e.to_string())
    })?;
    if !ok {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::invalid_credentials());
    }

    let at = OffsetDateTime::now_utc();
    if !store.record_login(user.id, at).await? {
        warn!(user_id = %user.id, "account deactivated during login");
        return Err(AppError::invalid_credentials());
    }
    user.last_login = Some(at);
    user.updated_at = at;

    let token = keys.sign(user.id, user.role()).map_err(|e| {
        error!(error = %e, "jwt sign failed");
        AppError::Internal(e.to_string())
    })?;

    info!(user_id = %user.id, role = %user.role(), "user logged in");
    Ok((token, user))
}

/// Resolves verified token claims to the active user they name.
pub async fn current_user(store: &dyn UserStore, claims: &Claims) -> Result<User, AppError> {
    match store.find_by_id(claims.sub).await? {
        Some(user) if user.is_active && user.role() == claims.role => Ok(user),
        Some(_) => {
            warn!(user_id = %claims.sub, "token for inactive account");
            Err(AppError::Authentication("User not found or inactive".into()))
        }
        None => {
            warn!(user_id = %claims.sub, "token for unknown user");
            Err(AppError::Authentication("User not found or inactive".into()))
        }
    }
}

/// Updates the display name and/or merges profile fields. The merged
/// profile is revalidated as a whole.
pub async fn update_profile(
    store: &dyn UserStore,
    mut user: User,
    name: Option<String>,
    profile_patch: Option<Value>,
) -> Result<User, AppError> {
    if let Some(name) = name {
        user.name = validate_name(&name)?;
    }
    match profile_patch {
        None | Some(Value::Null) => {}
        Some(Value::Object(patch)) => user.profile = user.profile.merged(patch)?,
        Some(_) => return Err(AppError::Validation("profile must be an object".into())),
    }

    let user = save(store, user, None, Persist::Details).await?;
    info!(user_id = %user.id, "profile updated");
    Ok(user)
}

pub async fn change_password(
    store: &dyn UserStore,
    user: User,
    current_password: &str,
    new_password: &str,
) -> Result<User, AppError> {
    if current_password.is_empty() || new_password.is_empty() {
        return Err(AppError::Validation(
            "Please provide current and new password".into(),
        ));
    }
    let ok = verify_password(current_password, &user.password_hash)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    if !ok {
        warn!(user_id = %user.id, "change password with wrong current password");
        return Err(AppError::Validation("Current password is incorrect".into()));
    }

    let user = save(store, user, Some(new_password), Persist::Password).await?;
    info!(user_id = %user.id, "password changed");
    Ok(user)
}

/// Soft delete. Returns false when the user does not exist.
pub async fn deactivate(store: &dyn UserStore, user_id: Uuid) -> Result<bool, AppError> {
    let found = store
        .set_active(user_id, false, OffsetDateTime::now_utc())
        .await?;
    if found {
        info!(user_id = %user_id, "user deactivated");
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::memory::MemoryUserStore;
    use crate::config::AppConfig;
    use crate::error::StoreError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    fn keys() -> JwtKeys {
        JwtKeys::from(&AppConfig::for_tests().jwt)
    }

    fn patient_request(email: &str, member_id: Option<&str>) -> RegisterRequest {
        let mut profile = json!({
            "firstName": "John",
            "lastName": "Smith",
            "dateOfBirth": "1985-03-15",
            "insuranceProvider": "HealthPlus Insurance"
        });
        if let Some(id) = member_id {
            profile["memberId"] = json!(id);
        }
        RegisterRequest {
            email: email.into(),
            password: "demo123".into(),
            name: "John Smith".into(),
            role: "patient".into(),
            profile,
        }
    }

    fn provider_request(email: &str, license: &str, npi: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: "provider123".into(),
            name: "Dr. Sarah Wilson".into(),
            role: "provider".into(),
            profile: json!({
                "firstName": "Sarah",
                "lastName": "Wilson",
                "specialty": "Internal Medicine",
                "licenseNumber": license,
                "npiNumber": npi,
                "yearsExperience": 15,
                "boardCertified": true
            }),
        }
    }

    #[test]
    fn email_pattern_accepts_common_addresses() {
        assert!(is_valid_email("patient@demo.com"));
        assert!(is_valid_email("dr.johnson@healthcenter.com"));
        assert!(!is_valid_email("no-at-sign.com"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.com"));
    }

    #[test]
    fn email_pattern_is_ascii_only() {
        assert!(!is_valid_email("josé@demo.com"));
        assert!(!is_valid_email("patient@démo.com"));
        assert!(is_valid_email("jose_1@demo.com"));
    }

    #[test]
    fn registration_validation_order() {
        let mut req = patient_request("bad", Some("M1"));
        assert_eq!(
            validate_registration(req).unwrap_err().to_string(),
            "Please enter a valid email"
        );

        req = patient_request("a@b.com", Some("M1"));
        req.password = "12345".into();
        assert_eq!(
            validate_registration(req).unwrap_err().to_string(),
            "Password must be at least 6 characters"
        );

        req = patient_request("a@b.com", Some("M1"));
        req.name = " ".into();
        assert_eq!(
            validate_registration(req).unwrap_err().to_string(),
            "Name is required"
        );

        req = patient_request("a@b.com", Some("M1"));
        req.role = "admin".into();
        assert_eq!(
            validate_registration(req).unwrap_err().to_string(),
            "Role must be one of patient, provider, payor"
        );
    }

    #[tokio::test]
    async fn patient_without_member_id_is_rejected_then_accepted_with_it() {
        let store = MemoryUserStore::new();

        let err = register(&store, patient_request("patient@demo.com", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(err
            .to_string()
            .contains("memberId is required for patient profile"));
        assert_eq!(store.count().await.unwrap(), 0);

        let user = register(&store, patient_request("patient@demo.com", Some("MEM1")))
            .await
            .unwrap();
        assert_eq!(user.role(), Role::Patient);
        let json = serde_json::to_value(user.safe_view()).unwrap();
        assert_eq!(json["role"], "patient");
        assert!(json.get("password").is_none());
        assert!(json.get("passwordHash").is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_and_nothing_is_written() {
        let store = MemoryUserStore::new();
        register(&store, patient_request("Patient@Demo.com ", Some("M1")))
            .await
            .unwrap();

        let err = register(&store, provider_request("patient@demo.com", "L1", "N1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_license_number_is_rejected() {
        let store = MemoryUserStore::new();
        register(&store, provider_request("a@clinic.com", "MD1", "111"))
            .await
            .unwrap();
        let err = register(&store, provider_request("b@clinic.com", "MD1", "222"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "licenseNumber is already registered");
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn password_is_hashed_before_storage() {
        let store = MemoryUserStore::new();
        let user = register(&store, patient_request("p@demo.com", Some("M1")))
            .await
            .unwrap();
        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_ne!(stored.password_hash, "demo123");
        assert!(verify_password("demo123", &stored.password_hash).unwrap());
    }

    #[tokio::test]
    async fn login_succeeds_only_for_matching_active_record() {
        let store = MemoryUserStore::new();
        let keys = keys();
        let user = register(&store, patient_request("patient@demo.com", Some("M1")))
            .await
            .unwrap();

        let (token, logged_in) = login(&store, &keys, "PATIENT@demo.com", "demo123", "patient")
            .await
            .unwrap();
        assert_eq!(logged_in.id, user.id);
        assert!(logged_in.last_login.is_some());
        assert!(logged_in.updated_at >= user.updated_at);
        assert_eq!(keys.verify(&token).unwrap().sub, user.id);

        let failures = [
            ("nobody@demo.com", "demo123", "patient"),
            ("patient@demo.com", "wrong-password", "patient"),
            ("patient@demo.com", "demo123", "provider"),
            ("patient@demo.com", "demo123", "superuser"),
        ];
        for (email, password, role) in failures {
            let err = login(&store, &keys, email, password, role).await.unwrap_err();
            assert!(
                matches!(&err, AppError::Authentication(m) if m == "Invalid credentials"),
                "{email}/{role}: {err:?}"
            );
        }

        deactivate(&store, user.id).await.unwrap();
        let err = login(&store, &keys, "patient@demo.com", "demo123", "patient")
            .await
            .unwrap_err();
        assert!(matches!(&err, AppError::Authentication(m) if m == "Invalid credentials"));
    }

    #[tokio::test]
    async fn login_requires_all_fields() {
        let store = MemoryUserStore::new();
        let err = login(&store, &keys(), "a@b.com", "", "patient")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn current_user_rejects_deactivated_accounts() {
        let store = MemoryUserStore::new();
        let keys = keys();
        let user = register(&store, patient_request("p@demo.com", Some("M1")))
            .await
            .unwrap();
        let token = keys.sign(user.id, Role::Patient).unwrap();
        let claims = keys.verify(&token).unwrap();
        assert_eq!(current_user(&store, &claims).await.unwrap().id, user.id);

        deactivate(&store, user.id).await.unwrap();
        assert!(matches!(
            current_user(&store, &claims).await,
            Err(AppError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn update_profile_merges_and_revalidates() {
        let store = MemoryUserStore::new();
        let user = register(&store, patient_request("p@demo.com", Some("M1")))
            .await
            .unwrap();
        let before = user.updated_at;

        let updated = update_profile(
            &store,
            user.clone(),
            Some("Johnny Smith".into()),
            Some(json!({"phone": "(555) 123-4567"})),
        )
        .await
        .unwrap();
        assert_eq!(updated.name, "Johnny Smith");
        assert!(updated.updated_at >= before);
        let Profile::Patient(p) = &updated.profile else {
            panic!("role changed");
        };
        assert_eq!(p.member_id, "M1");
        assert_eq!(p.phone.as_deref(), Some("(555) 123-4567"));

        let err = update_profile(&store, updated, None, Some(json!({"firstName": ""})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "firstName is required for patient profile");
        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Johnny Smith");
    }

    #[tokio::test]
    async fn change_password_requires_current_password() {
        let store = MemoryUserStore::new();
        let keys = keys();
        let user = register(&store, patient_request("p@demo.com", Some("M1")))
            .await
            .unwrap();

        let err = change_password(&store, user.clone(), "nope-nope", "newpass1")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Current password is incorrect");

        let err = change_password(&store, user.clone(), "demo123", "123")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        change_password(&store, user, "demo123", "newpass1")
            .await
            .unwrap();
        assert!(login(&store, &keys, "p@demo.com", "demo123", "patient")
            .await
            .is_err());
        assert!(login(&store, &keys, "p@demo.com", "newpass1", "patient")
            .await
            .is_ok());
    }

    /// A write that lands between the login lookup and the login stamp.
    enum Concurrent {
        RotatePassword(&'static str),
        Deactivate,
    }

    struct InterleavedStore {
        inner: MemoryUserStore,
        pending: Mutex<Option<Concurrent>>,
    }

    impl InterleavedStore {
        fn new(inner: MemoryUserStore, write: Concurrent) -> Self {
            Self {
                inner,
                pending: Mutex::new(Some(write)),
            }
        }
    }

    #[async_trait]
    impl UserStore for InterleavedStore {
        async fn insert(&self, user: &User) -> Result<(), StoreError> {
            self.inner.insert(user).await
        }

        async fn update_details(&self, user: &User) -> Result<(), StoreError> {
            self.inner.update_details(user).await
        }

        async fn update_password(
            &self,
            id: Uuid,
            password_hash: &str,
            at: OffsetDateTime,
        ) -> Result<(), StoreError> {
            self.inner.update_password(id, password_hash, at).await
        }

        async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> Result<bool, StoreError> {
            self.inner.record_login(id, at).await
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            self.inner.find_by_email(email).await
        }

        async fn find_active_by_email_and_role(
            &self,
            email: &str,
            role: Role,
        ) -> Result<Option<User>, StoreError> {
            let found = self.inner.find_active_by_email_and_role(email, role).await?;
            let write = self.pending.lock().unwrap().take();
            if let (Some(user), Some(write)) = (&found, write) {
                let now = OffsetDateTime::now_utc();
                match write {
                    Concurrent::RotatePassword(plain) => {
                        let hash = hash_password(plain).unwrap();
                        self.inner.update_password(user.id, &hash, now).await?;
                    }
                    Concurrent::Deactivate => {
                        self.inner.set_active(user.id, false, now).await?;
                    }
                }
            }
            Ok(found)
        }

        async fn set_active(
            &self,
            id: Uuid,
            active: bool,
            at: OffsetDateTime,
        ) -> Result<bool, StoreError> {
            self.inner.set_active(id, active, at).await
        }

        async fn count(&self) -> Result<i64, StoreError> {
            self.inner.count().await
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn password_changed_during_login_is_kept() {
        let inner = MemoryUserStore::new();
        let user = register(&inner, patient_request("p@demo.com", Some("M1")))
            .await
            .unwrap();
        let store = InterleavedStore::new(inner, Concurrent::RotatePassword("rotated99"));
        let keys = keys();

        login(&store, &keys, "p@demo.com", "demo123", "patient")
            .await
            .unwrap();

        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert!(verify_password("rotated99", &stored.password_hash).unwrap());
        assert!(!verify_password("demo123", &stored.password_hash).unwrap());
        assert!(stored.last_login.is_some());
        assert!(login(&store, &keys, "p@demo.com", "demo123", "patient")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn deactivation_during_login_fails_the_login() {
        let inner = MemoryUserStore::new();
        let user = register(&inner, patient_request("p@demo.com", Some("M1")))
            .await
            .unwrap();
        let store = InterleavedStore::new(inner, Concurrent::Deactivate);

        let err = login(&store, &keys(), "p@demo.com", "demo123", "patient")
            .await
            .unwrap_err();
        assert!(matches!(&err, AppError::Authentication(m) if m == "Invalid credentials"));

        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert!(stored.last_login.is_none());
    }

    #[tokio::test]
    async fn profile_update_from_stale_snapshot_keeps_new_password() {
        let store = MemoryUserStore::new();
        let stale = register(&store, patient_request("p@demo.com", Some("M1")))
            .await
            .unwrap();
        change_password(&store, stale.clone(), "demo123", "newpass1")
            .await
            .unwrap();

        update_profile(&store, stale, Some("Johnny Smith".into()), None)
            .await
            .unwrap();

        assert!(login(&store, &keys(), "p@demo.com", "newpass1", "patient")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn update_profile_rejects_member_id_of_another_patient() {
        let store = MemoryUserStore::new();
        register(&store, patient_request("first@demo.com", Some("M1")))
            .await
            .unwrap();
        let second = register(&store, patient_request("second@demo.com", Some("M2")))
            .await
            .unwrap();

        let err = update_profile(&store, second.clone(), None, Some(json!({"memberId": "M1"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "memberId is already registered");

        let stored = store.find_by_id(second.id).await.unwrap().unwrap();
        assert_eq!(stored, second);
    }
}
