//! User/group store: bcrypt-hashed credentials and ordered group
//! membership, persisted under the same `encrypted_` prefix rule as the
//! permissions graph.
//!
//! Groups are implicit: there is no `Group` record, only the set of
//! names that appear in some user's `joined_groups` or some Node's
//! group ACL. This store only ever touches the former.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto::CryptoProvider;
use crate::error::{SfsError, SfsResult};

pub const ADMIN: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserDump {
    name: String,
    password: String,
    #[serde(rename = "joinedGroups")]
    joined_groups: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    pub password_hash: String,
    pub joined_groups: Vec<String>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.name == ADMIN
    }
}

pub struct Users {
    users: HashMap<String, User>,
    json_path: PathBuf,
}

impl Users {
    pub fn load(json_path: &Path, crypto: &CryptoProvider) -> SfsResult<Self> {
        let dumps: Vec<UserDump> = if json_path.exists() {
            if CryptoProvider::is_encrypted(json_path) {
                crypto.decrypt_json(json_path)?
            } else {
                let text = fs::read_to_string(json_path)?;
                serde_json::from_str(&text)?
            }
        } else {
            Vec::new()
        };

        let mut users = HashMap::with_capacity(dumps.len());
        for dump in dumps {
            users.insert(
                dump.name.clone(),
                User {
                    name: dump.name,
                    password_hash: dump.password,
                    joined_groups: dump.joined_groups,
                },
            );
        }

        Ok(Self {
            users,
            json_path: json_path.to_path_buf(),
        })
    }

    fn persist(&self, crypto: &CryptoProvider) -> SfsResult<()> {
        if let Some(dir) = self.json_path.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut dumps: Vec<UserDump> = self
            .users
            .values()
            .map(|u| UserDump {
                name: u.name.clone(),
                password: u.password_hash.clone(),
                joined_groups: u.joined_groups.clone(),
            })
            .collect();
        dumps.sort_by(|a, b| a.name.cmp(&b.name));

        if CryptoProvider::is_encrypted(&self.json_path) {
            crypto.encrypt_json(&dumps, &self.json_path)
        } else {
            let text = serde_json::to_string_pretty(&dumps)?;
            let tmp = self.json_path.with_extension("tmp");
            fs::write(&tmp, text)?;
            fs::rename(&tmp, &self.json_path)?;
            Ok(())
        }
    }

    pub fn get_user(&self, name: &str) -> Option<&User> {
        self.users.get(name)
    }

    pub fn create_user(&mut self, crypto: &CryptoProvider, name: &str, password: &str) -> SfsResult<()> {
        if self.users.contains_key(name) {
            return Err(SfsError::Conflict(format!("user {name} already exists")));
        }

        let password_hash =
            bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| SfsError::BadInput(e.to_string()))?;
        self.users.insert(
            name.to_string(),
            User {
                name: name.to_string(),
                password_hash,
                joined_groups: Vec::new(),
            },
        );
        self.persist(crypto)
    }

    /// Constant-time comparison via `bcrypt::verify`. `NotFound` for an
    /// unknown user, `Denied` for a wrong password.
    pub fn verify_password(&self, name: &str, password: &str) -> SfsResult<()> {
        let user = self
            .users
            .get(name)
            .ok_or_else(|| SfsError::NotFound(name.to_string()))?;

        let ok = bcrypt::verify(password, &user.password_hash)
            .map_err(|e| SfsError::CryptoInvalid(e.to_string()))?;
        if ok {
            Ok(())
        } else {
            Err(SfsError::Denied("wrong password".into()))
        }
    }

    pub fn get_users_in_group(&self, group_name: &str) -> Vec<String> {
        self.users
            .values()
            .filter(|u| u.joined_groups.iter().any(|g| g == group_name))
            .map(|u| u.name.clone())
            .collect()
    }

    /// Appends `group_name` to every existing user in `names`. The admin
    /// user is added only if at least one non-admin user was added in the
    /// same call; otherwise the admin addition is rejected (an
    /// admin-only group is not allowed to form) and `Conflict` is
    /// returned, though any non-admin additions from this call are kept.
    pub fn add_users_to_group(
        &mut self,
        crypto: &CryptoProvider,
        group_name: &str,
        names: &[String],
    ) -> SfsResult<()> {
        let mut any_non_admin_added = false;

        for name in names {
            if name == ADMIN {
                continue;
            }
            if let Some(user) = self.users.get_mut(name) {
                if !user.joined_groups.iter().any(|g| g == group_name) {
                    user.joined_groups.push(group_name.to_string());
                }
                any_non_admin_added = true;
            }
        }

        let admin_requested = names.iter().any(|n| n == ADMIN);
        let admin_blocked = admin_requested && !any_non_admin_added;

        if admin_requested && any_non_admin_added {
            if let Some(admin) = self.users.get_mut(ADMIN) {
                if !admin.joined_groups.iter().any(|g| g == group_name) {
                    admin.joined_groups.push(group_name.to_string());
                }
            }
        }

        self.persist(crypto)?;

        if admin_blocked {
            return Err(SfsError::Conflict(format!(
                "group {group_name} would contain only admin"
            )));
        }
        Ok(())
    }

    /// Silently skips missing users, users not in the group, and admin
    /// (admin cannot be removed from any group).
    pub fn remove_users_from_group(
        &mut self,
        crypto: &CryptoProvider,
        group_name: &str,
        names: &[String],
    ) -> SfsResult<()> {
        for name in names {
            if name == ADMIN {
                continue;
            }
            if let Some(user) = self.users.get_mut(name) {
                user.joined_groups.retain(|g| g != group_name);
            }
        }
        self.persist(crypto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, CryptoProvider, Users) {
        let dir = tempfile::tempdir().unwrap();
        let crypto = CryptoProvider::from_key_bytes([5u8; 32]);
        let users = Users::load(&dir.path().join("json/users.json"), &crypto).unwrap();
        (dir, crypto, users)
    }

    #[test]
    fn create_then_verify_password() {
        let (_dir, crypto, mut users) = setup();
        users.create_user(&crypto, "alice", "s3cret").unwrap();
        users.verify_password("alice", "s3cret").unwrap();
        assert!(matches!(
            users.verify_password("alice", "wrong"),
            Err(SfsError::Denied(_))
        ));
    }

    #[test]
    fn duplicate_create_is_conflict() {
        let (_dir, crypto, mut users) = setup();
        users.create_user(&crypto, "alice", "s3cret").unwrap();
        assert!(matches!(
            users.create_user(&crypto, "alice", "other"),
            Err(SfsError::Conflict(_))
        ));
    }

    #[test]
    fn admin_only_group_is_rejected() {
        let (_dir, crypto, mut users) = setup();
        users.create_user(&crypto, ADMIN, "adminpw").unwrap();

        let err = users
            .add_users_to_group(&crypto, "team", &[ADMIN.to_string()])
            .unwrap_err();
        assert!(matches!(err, SfsError::Conflict(_)));
        assert!(users.get_users_in_group("team").is_empty());
    }

    #[test]
    fn admin_joins_group_alongside_a_non_admin() {
        let (_dir, crypto, mut users) = setup();
        users.create_user(&crypto, ADMIN, "adminpw").unwrap();
        users.create_user(&crypto, "alice", "s3cret").unwrap();

        users
            .add_users_to_group(&crypto, "team", &["alice".to_string(), ADMIN.to_string()])
            .unwrap();

        let mut members = users.get_users_in_group("team");
        members.sort();
        assert_eq!(members, vec![ADMIN.to_string(), "alice".to_string()]);
    }

    #[test]
    fn admin_is_immovable_from_groups() {
        let (_dir, crypto, mut users) = setup();
        users.create_user(&crypto, ADMIN, "adminpw").unwrap();
        users.create_user(&crypto, "alice", "s3cret").unwrap();
        users
            .add_users_to_group(&crypto, "team", &["alice".to_string(), ADMIN.to_string()])
            .unwrap();

        users
            .remove_users_from_group(&crypto, "team", &[ADMIN.to_string(), "alice".to_string()])
            .unwrap();

        // admin is skipped by remove_users_from_group regardless of what's
        // requested: alice leaves the group, admin does not.
        assert_eq!(users.get_users_in_group("team"), vec![ADMIN.to_string()]);
    }

    #[test]
    fn store_round_trips_through_encrypted_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let crypto = CryptoProvider::from_key_bytes([6u8; 32]);
        let json_path = dir.path().join("json/encrypted_users.json");

        {
            let mut users = Users::load(&json_path, &crypto).unwrap();
            users.create_user(&crypto, "alice", "s3cret").unwrap();
        }

        let reloaded = Users::load(&json_path, &crypto).unwrap();
        reloaded.verify_password("alice", "s3cret").unwrap();
    }
}
