//! Category-based permissions for the `default` user.

use std::collections::BTreeSet;

use sift_meta::CommandCategory;

pub const DEFAULT_USER: &str = "default";

#[derive(Clone, Debug)]
pub struct AclUser {
    allowed: BTreeSet<CommandCategory>,
}

impl Default for AclUser {
    fn default() -> Self {
        Self {
            allowed: CommandCategory::ALL.into_iter().collect(),
        }
    }
}

impl AclUser {
    /// True if every category of the command is allowed.
    pub fn permits(&self, categories: &[CommandCategory]) -> bool {
        categories.iter().all(|category| self.allowed.contains(category))
    }

    /// Apply `ACL SETUSER` rules in order. Nothing changes if any rule is invalid.
    pub fn apply_rules<S: AsRef<str>>(&mut self, rules: &[S]) -> anyhow::Result<()> {
        let mut allowed = self.allowed.clone();
        for rule in rules {
            let rule = rule.as_ref();
            let lowered = rule.to_ascii_lowercase();
            match lowered.as_str() {
                "allcommands" | "+@all" => allowed.extend(CommandCategory::ALL),
                "nocommands" | "-@all" => allowed.clear(),
                "on" => {}
                _ => {
                    if let Some(name) = lowered.strip_prefix("+@") {
                        allowed.insert(parse_category(name)?);
                    } else if let Some(name) = lowered.strip_prefix("-@") {
                        allowed.remove(&parse_category(name)?);
                    } else {
                        anyhow::bail!("Error in ACL SETUSER modifier '{rule}': Syntax error");
                    }
                }
            }
        }
        self.allowed = allowed;
        Ok(())
    }
}

fn parse_category(name: &str) -> anyhow::Result<CommandCategory> {
    name.parse::<CommandCategory>()
        .map_err(|_| anyhow::anyhow!("Error in ACL SETUSER modifier '@{name}': Unknown command category"))
}

pub fn denied_message(command: &str) -> String {
    format!(
        "NOPERM User {DEFAULT_USER} has no permissions to run the '{}' command",
        command.to_ascii_lowercase()
    )
}
