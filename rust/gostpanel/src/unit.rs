use crate::config::ServiceConfig;
use crate::rules::ForwardingRule;

/// Fixed keys of the generated systemd unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitTemplate {
    pub binary: String,
    pub description: String,
    pub restart: String,
    pub user: String,
    pub after: String,
    pub wanted_by: String,
}

impl UnitTemplate {
    pub fn from_config(cfg: &ServiceConfig) -> Self {
        Self {
            binary: cfg.binary.clone(),
            description: cfg.description.clone(),
            restart: cfg.restart.clone(),
            user: cfg.user.clone(),
            after: cfg.after.clone(),
            wanted_by: cfg.wanted_by.clone(),
        }
    }

    /// Forwarder argv: the binary, then `-L <listen> -F <forward>` per rule in order.
    pub fn command_line(&self, rules: &[ForwardingRule]) -> Vec<String> {
        let mut cmd = Vec::with_capacity(1 + rules.len() * 4);
        cmd.push(self.binary.clone());
        for r in rules {
            cmd.push("-L".to_string());
            cmd.push(r.listen_spec());
            cmd.push("-F".to_string());
            cmd.push(r.forward_spec());
        }
        cmd
    }

    pub fn render(&self, rules: &[ForwardingRule]) -> String {
        let exec = self.command_line(rules).join(" ");
        format!(
            "[Unit]\n\
             Description={}\n\
             After={}\n\
             \n\
             [Service]\n\
             ExecStart={}\n\
             Restart={}\n\
             User={}\n\
             \n\
             [Install]\n\
             WantedBy={}\n",
            self.description, self.after, exec, self.restart, self.user, self.wanted_by
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Protocol;

    fn template() -> UnitTemplate {
        UnitTemplate::from_config(&ServiceConfig::default())
    }

    fn rule(protocol: Protocol, lp: &str, ra: &str, rp: &str) -> ForwardingRule {
        ForwardingRule {
            protocol,
            local_addr: "127.0.0.1".into(),
            local_port: lp.into(),
            remote_addr: ra.into(),
            remote_port: rp.into(),
        }
    }

    #[test]
    fn command_line_keeps_rule_order() {
        let rules = vec![
            rule(Protocol::Tcp, "8080", "example.com", "80"),
            rule(Protocol::Udp, "5353", "1.1.1.1", "53"),
        ];
        assert_eq!(
            template().command_line(&rules),
            vec![
                "/usr/local/bin/gost/gost",
                "-L", "tcp://127.0.0.1:8080",
                "-F", "tcp://example.com:80",
                "-L", "udp://127.0.0.1:5353",
                "-F", "udp://1.1.1.1:53",
            ]
        );
    }

    #[test]
    fn render_produces_full_unit() {
        let rules = vec![rule(Protocol::Http, "8080", "example.com", "80")];
        let text = template().render(&rules);
        assert_eq!(
            text,
            "[Unit]\n\
             Description=GOST Service\n\
             After=network.target\n\
             \n\
             [Service]\n\
             ExecStart=/usr/local/bin/gost/gost -L http://127.0.0.1:8080 -F http://example.com:80\n\
             Restart=always\n\
             User=root\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n"
        );
    }

    #[test]
    fn render_uses_configured_keys() {
        let mut t = template();
        t.binary = "/opt/gost".into();
        t.user = "gost".into();
        t.restart = "on-failure".into();
        let text = t.render(&[rule(Protocol::Tcp, "1", "h", "2")]);
        assert!(text.contains("ExecStart=/opt/gost -L tcp://127.0.0.1:1 -F tcp://h:2\n"));
        assert!(text.contains("User=gost\n"));
        assert!(text.contains("Restart=on-failure\n"));
    }
}
