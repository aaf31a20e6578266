//! Access-control coordinator: composes the FS layer, the permissions
//! graph, and the user store behind the session state machine the shell
//! drives. Every mutating verb performs the on-disk change before the
//! graph update (graph methods persist themselves on success), so a
//! crash mid-sequence leaves at worst a Node-less encrypted entry,
//! discoverable via `check_path_integrity`, rather than a dangling graph
//! entry pointing at nothing.

use crate::crypto::CryptoProvider;
use crate::error::{SfsError, SfsResult};
use crate::fs::EncryptedFs;
use crate::graph::{Graph, ShareMode};
use crate::users::{Users, ADMIN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    Anonymous,
    Authenticated { user: String },
}

pub struct Coordinator {
    crypto: CryptoProvider,
    fs: EncryptedFs,
    graph: Graph,
    users: Users,
    session: Session,
}

impl Coordinator {
    pub fn new(crypto: CryptoProvider, fs: EncryptedFs, graph: Graph, users: Users) -> Self {
        Self {
            crypto,
            fs,
            graph,
            users,
            session: Session::Anonymous,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn whoami(&self) -> Option<&str> {
        match &self.session {
            Session::Authenticated { user } => Some(user),
            Session::Anonymous => None,
        }
    }

    fn current_user(&self) -> SfsResult<&str> {
        match &self.session {
            Session::Authenticated { user } => Ok(user),
            Session::Anonymous => Err(SfsError::Denied("not authenticated".into())),
        }
    }

    fn require_admin(&self) -> SfsResult<()> {
        if self.current_user()? == ADMIN {
            Ok(())
        } else {
            Err(SfsError::Denied("admin privilege required".into()))
        }
    }

    fn groups_of(&self, user_name: &str) -> Vec<String> {
        self.users
            .get_user(user_name)
            .map(|u| u.joined_groups.clone())
            .unwrap_or_default()
    }

    fn group_exists(&self, name: &str) -> bool {
        !self.users.get_users_in_group(name).is_empty() || self.graph.has_group_reference(name)
    }

    pub fn login(&mut self, name: &str, password: &str) -> SfsResult<()> {
        if self.session != Session::Anonymous {
            return Err(SfsError::BadInput("already authenticated".into()));
        }
        self.users.verify_password(name, password)?;
        self.session = Session::Authenticated {
            user: name.to_string(),
        };
        Ok(())
    }

    pub fn register(&mut self, name: &str, password: &str) -> SfsResult<()> {
        if self.session != Session::Anonymous {
            return Err(SfsError::BadInput("already authenticated".into()));
        }
        if self.users.get_user(name).is_some() {
            return Err(SfsError::Conflict(format!("user {name} already exists")));
        }
        // disk change, then graph update+persist, then user-store persist
        // last, same fixed order every other mutating verb follows, so a
        // failure here never leaves a user record pointing at a home that
        // doesn't exist.
        self.graph.init_user_directory(&self.fs, &self.crypto, name)?;
        self.users.create_user(&self.crypto, name, password)?;
        self.session = Session::Authenticated {
            user: name.to_string(),
        };
        Ok(())
    }

    pub fn logout(&mut self) -> SfsResult<()> {
        self.current_user()?;
        self.session = Session::Anonymous;
        Ok(())
    }

    /// No readability gate on `path`'s own node: listing decides
    /// plaintext-vs-encrypted per child (see `Graph::list_directory`), not
    /// on whether the caller may read the directory node itself - a bare
    /// home directory must still be listable so an unshared child shows up
    /// as its opaque encrypted name rather than vanishing entirely.
    pub fn ls(&self, path: &str) -> SfsResult<Vec<String>> {
        let user = self.current_user()?.to_string();
        let groups = self.groups_of(&user);
        if self.graph.get_node(path).is_none() {
            return Err(SfsError::NotFound(path.to_string()));
        }
        Ok(self.graph.list_directory(&self.fs, &self.crypto, path, &user, &groups))
    }

    pub fn cd(&self, path: &str) -> SfsResult<()> {
        let user = self.current_user()?.to_string();
        let groups = self.groups_of(&user);
        let node = self
            .graph
            .get_node(path)
            .ok_or_else(|| SfsError::NotFound(path.to_string()))?;
        if !node.is_readable(&user, &groups) {
            return Err(SfsError::Denied(format!("{user} cannot read {path}")));
        }
        if !self.fs.is_folder(&self.crypto, path)? {
            return Err(SfsError::BadInput(format!("{path} is not a folder")));
        }
        Ok(())
    }

    pub fn cat(&self, path: &str) -> SfsResult<String> {
        let user = self.current_user()?.to_string();
        let groups = self.groups_of(&user);
        let node = self
            .graph
            .get_node(path)
            .ok_or_else(|| SfsError::NotFound(path.to_string()))?;
        if !node.is_readable(&user, &groups) {
            return Err(SfsError::Denied(format!("{user} cannot read {path}")));
        }
        self.fs.read_file(&self.crypto, path)
    }

    pub fn touch(&mut self, path: &str) -> SfsResult<()> {
        let user = self.current_user()?.to_string();
        let groups = self.groups_of(&user);
        self.graph.create_file(&self.fs, &self.crypto, path, &user, &groups)
    }

    pub fn mkdir(&mut self, path: &str) -> SfsResult<()> {
        let user = self.current_user()?.to_string();
        let groups = self.groups_of(&user);
        self.graph.create_folder(&self.fs, &self.crypto, path, &user, &groups)
    }

    pub fn echo(&mut self, path: &str, content: &str) -> SfsResult<()> {
        let user = self.current_user()?.to_string();
        let groups = self.groups_of(&user);
        let node = self
            .graph
            .get_node(path)
            .ok_or_else(|| SfsError::NotFound(path.to_string()))?;
        if !node.is_writable(&user, &groups) {
            return Err(SfsError::Denied(format!("{user} cannot write {path}")));
        }
        self.fs.write_file(&self.crypto, path, content)
    }

    pub fn mv(&mut self, path: &str, new_name: &str) -> SfsResult<()> {
        let user = self.current_user()?.to_string();
        let groups = self.groups_of(&user);
        let node = self
            .graph
            .get_node(path)
            .ok_or_else(|| SfsError::NotFound(path.to_string()))?;
        if !node.is_writable(&user, &groups) {
            return Err(SfsError::Denied(format!("{user} cannot write {path}")));
        }
        self.graph.rename_node(&self.fs, &self.crypto, path, new_name)
    }

    /// `choice`: 1 = owner-only, 2 = group-share, 3 = world-share.
    pub fn chp(&mut self, path: &str, choice: u8) -> SfsResult<()> {
        let user = self.current_user()?.to_string();
        let node = self
            .graph
            .get_node(path)
            .ok_or_else(|| SfsError::NotFound(path.to_string()))?;
        if !node.is_owner(&user) {
            return Err(SfsError::Denied(format!("{user} does not own {path}")));
        }
        let mode = ShareMode::try_from(choice)?;
        let groups = self.groups_of(&user);
        self.graph.change_permissions(&self.crypto, mode, path, &groups)
    }

    pub fn create_group(&mut self, name: &str, members: &[String]) -> SfsResult<()> {
        self.require_admin()?;
        self.users.add_users_to_group(&self.crypto, name, members)
    }

    pub fn update_group(&mut self, name: &str, to_add: &[String], to_remove: &[String]) -> SfsResult<()> {
        self.require_admin()?;
        if !self.group_exists(name) {
            return Err(SfsError::NotFound(name.to_string()));
        }
        self.users.add_users_to_group(&self.crypto, name, to_add)?;
        self.users.remove_users_from_group(&self.crypto, name, to_remove)
    }

    pub fn delete_group(&mut self, name: &str) -> SfsResult<()> {
        self.require_admin()?;
        if !self.group_exists(name) {
            return Err(SfsError::NotFound(name.to_string()));
        }
        self.graph.delete_group(&self.crypto, name)
    }

    /// Runs at login time; the shell prints each returned path as
    /// corrupted.
    pub fn check_path_integrity(&self, prefix: &str) -> Vec<String> {
        self.graph.check_path_integrity(&self.fs, &self.crypto, prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Coordinator) {
        let dir = tempfile::tempdir().unwrap();
        let crypto = CryptoProvider::from_key_bytes([13u8; 32]);
        let fs = EncryptedFs::new(dir.path().join("files")).unwrap();
        let graph = Graph::load(&dir.path().join("json/permissions.json"), &crypto).unwrap();
        let users = Users::load(&dir.path().join("json/users.json"), &crypto).unwrap();
        (dir, Coordinator::new(crypto, fs, graph, users))
    }

    #[test]
    fn register_touch_echo_cat_round_trip() {
        let (_dir, mut c) = setup();
        c.register("alice", "s3cret").unwrap();
        c.touch("alice/hello.txt").unwrap();
        c.echo("alice/hello.txt", "world").unwrap();
        assert_eq!(c.cat("alice/hello.txt").unwrap(), "world");
        assert_eq!(c.ls("alice").unwrap(), vec!["hello.txt".to_string()]);
    }

    #[test]
    fn cross_user_isolation() {
        let (_dir, mut c) = setup();
        c.register("alice", "s3cret").unwrap();
        c.touch("alice/secret").unwrap();
        c.logout().unwrap();

        c.register("bob", "hunter2").unwrap();
        assert!(matches!(c.cat("alice/secret"), Err(SfsError::Denied(_))));
        let listing = c.ls("alice").unwrap();
        assert_eq!(listing.len(), 1);
        assert_ne!(listing[0], "secret");
    }

    #[test]
    fn group_share_then_revoke() {
        let (_dir, mut c) = setup();
        c.register("alice", "s3cret").unwrap();
        c.logout().unwrap();
        c.register("bob", "hunter2").unwrap();
        c.logout().unwrap();
        c.register(ADMIN, "adminpw").unwrap();
        c.create_group("team", &["alice".to_string(), "bob".to_string()]).unwrap();
        c.logout().unwrap();

        c.login("alice", "s3cret").unwrap();
        c.touch("alice/note").unwrap();
        c.chp("alice/note", 2).unwrap();
        c.logout().unwrap();

        c.login("bob", "hunter2").unwrap();
        c.cat("alice/note").unwrap();
        assert!(matches!(c.touch("alice/x"), Err(SfsError::Denied(_))));
        c.logout().unwrap();

        c.login(ADMIN, "adminpw").unwrap();
        c.delete_group("team").unwrap();
        c.logout().unwrap();

        c.login("bob", "hunter2").unwrap();
        assert!(matches!(c.cat("alice/note"), Err(SfsError::Denied(_))));
    }

    #[test]
    fn rename_preserves_contents_and_old_path_is_gone() {
        let (_dir, mut c) = setup();
        c.register("alice", "s3cret").unwrap();
        c.touch("alice/note").unwrap();
        c.echo("alice/note", "hi").unwrap();
        c.mv("alice/note", "memo").unwrap();

        assert_eq!(c.cat("alice/memo").unwrap(), "hi");
        assert!(matches!(c.cat("alice/note"), Err(SfsError::NotFound(_))));
    }

    #[test]
    fn only_admin_may_delete_groups() {
        let (_dir, mut c) = setup();
        c.register(ADMIN, "adminpw").unwrap();
        c.create_group("team", &[ADMIN.to_string()]).unwrap_err();
        c.logout().unwrap();

        c.register("alice", "s3cret").unwrap();
        assert!(matches!(
            c.create_group("team", &["alice".to_string()]),
            Err(SfsError::Denied(_))
        ));
    }
}
