//! Interactive REPL driving a `Coordinator`: tokenises each line, resolves
//! relative paths against a shell-local `cwd` (the core never canonicalises
//! `.`/`..` on its own, spec §3), and prints the one-line, stores-unchanged
//! failure message the spec's error taxonomy calls for on every verb.
//!
//! Grounded on `examples/original_source/main.py`'s `CLI(cmd.Cmd)`, the
//! verb table, the `with_user`/`with_admin` guards (folded here into
//! `Shell::run_verb`'s dispatch instead of per-handler decorators), and
//! `convertToAbsolutePath`'s `.`/`..` resolution.

use std::io::{self, BufRead, Write};

use sfs::{Coordinator, SfsError, ADMIN};

const PROMPT_ANON: &str = "sfs> ";

pub struct Shell {
    coordinator: Coordinator,
    cwd: String,
}

impl Shell {
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            cwd: String::new(),
        }
    }

    /// Resolves `path` against `cwd`, handling a leading `/` as absolute and
    /// collapsing `.`/`..` components. Mirrors `convertToAbsolutePath`.
    fn to_absolute(&self, path: &str) -> String {
        let joined = if path.starts_with('/') {
            path.to_string()
        } else if self.cwd.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.cwd, path)
        };

        let mut parts: Vec<&str> = Vec::new();
        for part in joined.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        parts.join("/")
    }

    pub fn run(mut self) -> io::Result<()> {
        println!("Welcome to the Secure File System CLI. Type help or ? to list commands.");
        let stdin = io::stdin();
        loop {
            self.print_prompt()?;
            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                println!();
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let verb = parts.next().unwrap_or("");
            let rest: Vec<&str> = parts.collect();

            if matches!(verb, "quit" | "exit") {
                break;
            }
            self.dispatch(verb, &rest);
        }
        Ok(())
    }

    fn print_prompt(&self) -> io::Result<()> {
        match self.coordinator.whoami() {
            Some(user) => print!("sfs> {user}@/{}$ ", self.cwd),
            None => print!("{PROMPT_ANON}"),
        }
        io::stdout().flush()
    }

    fn dispatch(&mut self, verb: &str, args: &[&str]) {
        match verb {
            "login" => self.cmd_login(),
            "register" => self.cmd_register(),
            "logout" => self.cmd_logout(),
            "pwd" => println!("/{}", self.cwd),
            "ls" => self.cmd_ls(args),
            "cd" => self.cmd_cd(args),
            "cat" => self.cmd_cat(args),
            "touch" => self.cmd_touch(args),
            "mkdir" => self.cmd_mkdir(args),
            "echo" => self.cmd_echo(args),
            "mv" => self.cmd_mv(args),
            "chp" => self.cmd_chp(args),
            "create_group" => self.cmd_create_group(args),
            "update_group" => self.cmd_update_group(args),
            "delete_group" => self.cmd_delete_group(args),
            "help" | "?" => self.print_help(),
            "" => {}
            other => println!("Unknown command: {other}"),
        }
    }

    fn print_help(&self) {
        println!(
            "Commands: login, register, logout, pwd, ls, cd, cat, touch, mkdir, echo, mv, chp, \
             create_group, update_group, delete_group, quit"
        );
    }

    fn print_err(err: SfsError) {
        let message = match &err {
            SfsError::NotFound(_) => "Invalid path".to_string(),
            SfsError::Denied(_) => "Access denied".to_string(),
            SfsError::Conflict(msg) => msg.clone(),
            SfsError::CryptoInvalid(_) => "Corrupted or tampered data".to_string(),
            SfsError::BadInput(msg) => msg.clone(),
            SfsError::Io(e) => e.to_string(),
            SfsError::Json(e) => e.to_string(),
        };
        println!("{message}");
    }

    fn read_line(prompt: &str) -> io::Result<String> {
        print!("{prompt}");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }

    fn cmd_login(&mut self) {
        if self.coordinator.whoami().is_some() {
            println!("Please logout first");
            return;
        }
        let Ok(username) = Self::read_line("Enter username: ") else {
            return;
        };
        let Ok(password) = rpassword::prompt_password("Enter password: ") else {
            return;
        };

        match self.coordinator.login(&username, &password) {
            Ok(()) => {
                self.cwd = Self::home_dir(&username);
                println!("Logged in as {username}");
                self.report_corruption(&username);
            }
            Err(err) => Self::print_err(err),
        }
    }

    /// Mirrors `do_login`/`do_register`'s `curr_dir = f"/{user.name}" if
    /// not user.isAdmin else "/"`: admin starts at the root, every other
    /// user starts in their own home.
    fn home_dir(username: &str) -> String {
        if username == ADMIN {
            String::new()
        } else {
            username.to_string()
        }
    }

    fn cmd_register(&mut self) {
        if self.coordinator.whoami().is_some() {
            println!("Please logout first");
            return;
        }
        let Ok(username) = Self::read_line("Enter username: ") else {
            return;
        };
        let Ok(password) = rpassword::prompt_password("Enter password: ") else {
            return;
        };
        let Ok(confirm) = rpassword::prompt_password("Confirm password: ") else {
            return;
        };
        if password != confirm {
            println!("Passwords don't match");
            return;
        }

        match self.coordinator.register(&username, &password) {
            Ok(()) => {
                self.cwd = Self::home_dir(&username);
                println!("User {username} registered and logged in");
            }
            Err(err) => Self::print_err(err),
        }
    }

    fn cmd_logout(&mut self) {
        match self.coordinator.logout() {
            Ok(()) => {
                self.cwd.clear();
                println!("Logged out");
            }
            Err(err) => Self::print_err(err),
        }
    }

    /// Prints each corrupted logical path under the user's home, matching
    /// the integrity-scan-on-login behaviour from spec §7/§8 scenario 6.
    fn report_corruption(&self, home: &str) {
        for path in self.coordinator.check_path_integrity(home) {
            println!("File /{path} is corrupted \u{274c}");
        }
    }

    fn cmd_ls(&mut self, args: &[&str]) {
        let path = if args.is_empty() {
            self.cwd.clone()
        } else {
            self.to_absolute(args[0])
        };
        match self.coordinator.ls(&path) {
            Ok(names) => {
                for name in names {
                    println!("{name}");
                }
            }
            Err(err) => Self::print_err(err),
        }
    }

    fn cmd_cd(&mut self, args: &[&str]) {
        let Some(target) = args.first() else {
            println!("usage: cd <path>");
            return;
        };
        let path = self.to_absolute(target);
        match self.coordinator.cd(&path) {
            Ok(()) => self.cwd = path,
            Err(err) => Self::print_err(err),
        }
    }

    fn cmd_cat(&mut self, args: &[&str]) {
        let Some(target) = args.first() else {
            println!("usage: cat <path>");
            return;
        };
        let path = self.to_absolute(target);
        match self.coordinator.cat(&path) {
            Ok(contents) => println!("{contents}"),
            Err(err) => Self::print_err(err),
        }
    }

    fn cmd_touch(&mut self, args: &[&str]) {
        let Some(target) = args.first() else {
            println!("usage: touch <path>");
            return;
        };
        let path = self.to_absolute(target);
        if let Err(err) = self.coordinator.touch(&path) {
            Self::print_err(err);
        }
    }

    fn cmd_mkdir(&mut self, args: &[&str]) {
        let Some(target) = args.first() else {
            println!("usage: mkdir <path>");
            return;
        };
        let path = self.to_absolute(target);
        if let Err(err) = self.coordinator.mkdir(&path) {
            Self::print_err(err);
        }
    }

    fn cmd_echo(&mut self, args: &[&str]) {
        if args.len() < 2 {
            println!("usage: echo <path> <content...>");
            return;
        }
        let path = self.to_absolute(args[0]);
        let content = args[1..].join(" ");
        if let Err(err) = self.coordinator.echo(&path, &content) {
            Self::print_err(err);
        }
    }

    fn cmd_mv(&mut self, args: &[&str]) {
        if args.len() < 2 {
            println!("usage: mv <path> <new-name>");
            return;
        }
        let path = self.to_absolute(args[0]);
        if let Err(err) = self.coordinator.mv(&path, args[1]) {
            Self::print_err(err);
        }
    }

    fn cmd_chp(&mut self, args: &[&str]) {
        let Some(target) = args.first() else {
            println!("usage: chp <path>");
            return;
        };
        let path = self.to_absolute(target);
        println!("1) owner only  2) share with my groups  3) share with everyone");
        let Ok(choice) = Self::read_line("Choose a permission mode: ") else {
            return;
        };
        let Ok(choice) = choice.trim().parse::<u8>() else {
            println!("Invalid choice");
            return;
        };
        if let Err(err) = self.coordinator.chp(&path, choice) {
            Self::print_err(err);
        }
    }

    fn cmd_create_group(&mut self, args: &[&str]) {
        let Some(name) = args.first() else {
            println!("usage: create_group <name>");
            return;
        };
        let Ok(members_line) =
            Self::read_line("Enter the names of the users to add to the group. Separate with a space: ")
        else {
            return;
        };
        let members: Vec<String> = members_line.split_whitespace().map(str::to_string).collect();
        match self.coordinator.create_group(name, &members) {
            Ok(()) => println!("Group {name} created"),
            Err(err) => Self::print_err(err),
        }
    }

    fn cmd_update_group(&mut self, args: &[&str]) {
        let Some(name) = args.first() else {
            println!("usage: update_group <name>");
            return;
        };
        println!("Enter 'add <usernames>' or 'remove <usernames>', separated by spaces. Enter 'done' to finish.");
        loop {
            let Ok(line) = Self::read_line("Enter command: ") else {
                return;
            };
            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some("add") => {
                    let names: Vec<String> = tokens.map(str::to_string).collect();
                    if let Err(err) = self.coordinator.update_group(name, &names, &[]) {
                        Self::print_err(err);
                    }
                }
                Some("remove") => {
                    let names: Vec<String> = tokens.map(str::to_string).collect();
                    if let Err(err) = self.coordinator.update_group(name, &[], &names) {
                        Self::print_err(err);
                    }
                }
                Some("done") => break,
                _ => println!("Invalid command"),
            }
        }
        println!("Group {name} updated");
    }

    fn cmd_delete_group(&mut self, args: &[&str]) {
        let Some(name) = args.first() else {
            println!("usage: delete_group <name>");
            return;
        };
        match self.coordinator.delete_group(name) {
            Ok(()) => println!("Group {name} deleted"),
            Err(err) => Self::print_err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    use sfs::{CryptoProvider, EncryptedFs, Graph, Users};

    fn shell() -> (tempfile::TempDir, Shell) {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("fernet.key");
        std::fs::write(&key_path, URL_SAFE_NO_PAD.encode([21u8; 32])).unwrap();
        let crypto = CryptoProvider::load(&key_path).unwrap();
        let fs = EncryptedFs::new(dir.path().join("files")).unwrap();
        let graph = Graph::load(&dir.path().join("json/permissions.json"), &crypto).unwrap();
        let users = Users::load(&dir.path().join("json/users.json"), &crypto).unwrap();
        let coordinator = Coordinator::new(crypto, fs, graph, users);
        (dir, Shell::new(coordinator))
    }

    #[test]
    fn absolute_path_passes_through() {
        let (_dir, shell) = shell();
        assert_eq!(shell.to_absolute("/alice/notes"), "alice/notes");
    }

    #[test]
    fn relative_path_joins_cwd() {
        let (_dir, mut shell) = shell();
        shell.cwd = "alice".to_string();
        assert_eq!(shell.to_absolute("notes"), "alice/notes");
    }

    #[test]
    fn dot_dot_pops_a_segment() {
        let (_dir, mut shell) = shell();
        shell.cwd = "alice/sub".to_string();
        assert_eq!(shell.to_absolute("../memo"), "alice/memo");
    }

    #[test]
    fn dot_is_a_no_op() {
        let (_dir, mut shell) = shell();
        shell.cwd = "alice".to_string();
        assert_eq!(shell.to_absolute("./notes"), "alice/notes");
    }
}
