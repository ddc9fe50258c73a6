use std::sync::Arc;
use std::time::Duration;

use domain::{Permission, Role};
use gateway_auth::{AuthError, SecurityManager, SecuritySettings};

fn manager_with_ttl(ttl_seconds: u64) -> SecurityManager {
    SecurityManager::new(SecuritySettings {
        token_secret: b"test-secret".to_vec(),
        encryption_key: Some(b"test-encryption-key".to_vec()),
        token_ttl_seconds: ttl_seconds,
        password_iterations: 1000,
    })
    .expect("manager")
}

fn manager() -> SecurityManager {
    manager_with_ttl(3600)
}

#[test]
fn create_user_then_authenticate() {
    let security = manager();
    security.create_user("a", "pw", "admin").expect("create");

    let token = security.authenticate("a", "pw").expect("token");
    assert!(!token.is_empty());
    assert!(security.authenticate("a", "wrong").is_none());
    assert!(security.authenticate("missing", "pw").is_none());

    let claims = security.verify_token(&token).expect("claims");
    assert_eq!(claims.username, "a");
    assert_eq!(claims.role, Role::Admin);
}

#[test]
fn invalid_role_is_rejected() {
    let security = manager();
    let err = security.create_user("a", "pw", "superuser").expect_err("role");
    assert!(matches!(err, AuthError::InvalidRole(role) if role == "superuser"));
    assert!(!security.has_user("a"));
}

#[test]
fn recreating_a_user_overwrites_it() {
    let security = manager();
    security.create_user("bob", "old", "viewer").expect("create");
    security.create_user("bob", "new", "operator").expect("recreate");

    assert!(security.authenticate("bob", "old").is_none());
    assert!(security.authenticate("bob", "new").is_some());
    assert_eq!(security.user_role("bob"), Some(Role::Operator));
}

#[test]
fn manage_users_is_admin_only() {
    let security = manager();
    security.create_user("root", "pw", "admin").expect("admin");
    security.create_user("op", "pw", "operator").expect("operator");
    security.create_user("eye", "pw", "viewer").expect("viewer");

    let admin = security.authenticate("root", "pw").expect("admin token");
    let operator = security.authenticate("op", "pw").expect("operator token");
    let viewer = security.authenticate("eye", "pw").expect("viewer token");

    assert!(security.check_permission_str(&admin, "manage_users"));
    assert!(!security.check_permission_str(&operator, "manage_users"));
    assert!(!security.check_permission_str(&viewer, "manage_users"));

    assert!(security.check_permission(&operator, Permission::Write));
    assert!(!security.check_permission(&operator, Permission::Configure));
    assert!(security.check_permission(&viewer, Permission::Read));
    assert!(!security.check_permission(&viewer, Permission::Write));
    assert!(!security.check_permission_str(&admin, "launch_missiles"));
}

#[test]
fn tampered_token_is_rejected() {
    let security = manager();
    security.create_user("root", "pw", "admin").expect("admin");
    let token = security.authenticate("root", "pw").expect("token");

    let mut tampered = token.clone();
    let last = tampered.pop().expect("non-empty");
    tampered.push(if last == 'A' { 'B' } else { 'A' });
    assert!(security.verify_token(&tampered).is_none());
    assert!(!security.check_permission(&tampered, Permission::Read));
    assert!(security.verify_token("not.a.token").is_none());

    // 其他实例签发的令牌不被接受
    let other = SecurityManager::new(SecuritySettings {
        password_iterations: 1000,
        ..SecuritySettings::default()
    })
    .expect("other");
    assert!(other.verify_token(&token).is_none());
}

#[test]
fn expired_token_is_rejected() {
    let security = manager_with_ttl(1);
    security.create_user("a", "pw", "admin").expect("create");
    let token = security.authenticate("a", "pw").expect("token");
    assert!(security.verify_token(&token).is_some());

    std::thread::sleep(Duration::from_millis(2100));
    assert!(security.verify_token(&token).is_none());
    assert!(!security.check_permission(&token, Permission::Read));
}

#[test]
fn encrypt_then_decrypt() {
    let security = manager();
    let sealed = security.encrypt_data("modbus-password").expect("encrypt");
    assert_ne!(sealed, "modbus-password");
    assert_eq!(security.decrypt_data(&sealed).expect("decrypt"), "modbus-password");

    assert!(matches!(security.decrypt_data("%%%"), Err(AuthError::Crypto(_))));
    let other = SecurityManager::new(SecuritySettings {
        encryption_key: Some(b"another-key".to_vec()),
        password_iterations: 1000,
        ..SecuritySettings::default()
    })
    .expect("other");
    assert!(other.decrypt_data(&sealed).is_err());
}

#[test]
fn zero_ttl_is_invalid() {
    let result = SecurityManager::new(SecuritySettings {
        token_ttl_seconds: 0,
        ..SecuritySettings::default()
    });
    assert!(matches!(result, Err(AuthError::InvalidSettings(_))));
}

#[test]
fn concurrent_user_creation_keeps_every_user() {
    let security = Arc::new(manager());
    let workers: Vec<_> = (0..8)
        .map(|i| {
            let security = security.clone();
            std::thread::spawn(move || {
                security
                    .create_user(&format!("user{}", i), "pw", "viewer")
                    .expect("create");
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("join");
    }
    for i in 0..8 {
        assert!(security.has_user(&format!("user{}", i)));
    }
}
