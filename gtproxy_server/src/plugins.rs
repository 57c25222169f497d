//! Plugin surface.
//!
//! Scripts are a compile-time registry: each plugin gets one shot at the
//! API during startup and may register commands and packet hooks. The
//! built-in set covers the stock proxy commands; forks add plugins by
//! pushing onto [`builtin_plugins`].

use gtproxy_shared::command::CommandRegistry;
use gtproxy_shared::config::ProxyConfig;
use gtproxy_shared::hooks::{HookBus, PacketHook};
use gtproxy_shared::variant::VariantArg;
use tracing::info;

use crate::inject::VariantOptions;
use crate::relay::CommandContext;

/// What a plugin may touch during initialization.
pub struct PluginApi<'a> {
    pub config: &'a ProxyConfig,
    commands: &'a mut CommandRegistry<CommandContext>,
    hooks: &'a mut HookBus,
}

impl PluginApi<'_> {
    pub fn register_command<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&[String], &mut CommandContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.commands.register(name, handler);
    }

    /// Subscribes to `serverBoundPacket` or `clientBoundPacket`.
    pub fn on(&mut self, event: &str, hook: PacketHook) {
        self.hooks.on(event, hook);
    }
}

pub trait ProxyPlugin: Send {
    fn name(&self) -> &'static str;
    fn init(&self, api: &mut PluginApi<'_>);
}

/// The compiled-in plugin set.
pub fn builtin_plugins() -> Vec<Box<dyn ProxyPlugin>> {
    vec![Box::new(Essentials)]
}

/// Initializes every plugin against the given registries.
pub fn install(
    config: &ProxyConfig,
    commands: &mut CommandRegistry<CommandContext>,
    hooks: &mut HookBus,
) {
    let mut api = PluginApi {
        config,
        commands,
        hooks,
    };
    for plugin in builtin_plugins() {
        plugin.init(&mut api);
        info!(plugin = plugin.name(), "plugin installed");
    }
}

/// Stock command set: world hopping, local appearance changes, and
/// console helpers.
struct Essentials;

impl ProxyPlugin for Essentials {
    fn name(&self) -> &'static str {
        "essentials"
    }

    fn init(&self, api: &mut PluginApi<'_>) {
        api.register_command("help", |_args, ctx| {
            let prefix = ctx.prefix;
            let list = ctx
                .command_names
                .iter()
                .map(|name| format!("{prefix}{name}"))
                .collect::<Vec<_>>()
                .join(", ");
            ctx.log(format!("Commands: {list}"));
            Ok(())
        });

        api.register_command("warp", |args, ctx| {
            match args.first() {
                Some(world) => {
                    let world = world.to_uppercase();
                    ctx.log(format!("Warping to {world}"));
                    ctx.join_world(&world, false);
                }
                None => ctx.log("Usage: warp <world>"),
            }
            Ok(())
        });

        api.register_command("skin", |args, ctx| {
            let Some(raw) = args.first() else {
                ctx.log("Usage: skin <color>");
                return Ok(());
            };
            let color: i64 = raw.parse().map_err(|_| anyhow::anyhow!("bad color {raw}"))?;
            let net_id = ctx.local_net_id;
            anyhow::ensure!(net_id >= 0, "local player not spawned yet");
            ctx.variant_to_client(
                "OnChangeSkin",
                vec![VariantArg::Num(color as f64)],
                VariantOptions {
                    net_id,
                    ..Default::default()
                },
            );
            Ok(())
        });

        api.register_command("name", |args, ctx| {
            anyhow::ensure!(!args.is_empty(), "usage: name <text>");
            let net_id = ctx.local_net_id;
            anyhow::ensure!(net_id >= 0, "local player not spawned yet");
            let name = args.join(" ");
            ctx.variant_to_client(
                "OnNameChanged",
                vec![VariantArg::Text(name)],
                VariantOptions {
                    net_id,
                    ..Default::default()
                },
            );
            Ok(())
        });

        api.register_command("list", |_args, ctx| {
            if ctx.participants.is_empty() {
                ctx.log("Nobody here.");
                return Ok(());
            }
            let mut lines: Vec<(i32, String)> = ctx
                .participants
                .iter()
                .map(|p| (p.net_id, format!("{} ({})", p.name, p.net_id)))
                .collect();
            lines.sort_by_key(|(net_id, _)| *net_id);
            let list = lines
                .into_iter()
                .map(|(_, line)| line)
                .collect::<Vec<_>>()
                .join(", ");
            ctx.log(format!("In world: {list}"));
            Ok(())
        });

        api.register_command("exit", |_args, ctx| {
            ctx.quit_to_exit();
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::InjectAction;
    use gtproxy_shared::world::WorldParticipant;

    fn context() -> CommandContext {
        let mut commands = CommandRegistry::new('/');
        let mut hooks = HookBus::new();
        install(&ProxyConfig::default(), &mut commands, &mut hooks);
        CommandContext::new(
            '/',
            5,
            vec![WorldParticipant {
                net_id: 5,
                user_id: 10,
                name: "Dev".into(),
                kind: "local".into(),
                spawn_tag: "avatar".into(),
            }],
            commands.names().into_iter().map(str::to_string).collect(),
        )
    }

    fn registry() -> CommandRegistry<CommandContext> {
        let mut commands = CommandRegistry::new('/');
        let mut hooks = HookBus::new();
        install(&ProxyConfig::default(), &mut commands, &mut hooks);
        commands
    }

    #[test]
    fn warp_uppercases_and_joins() {
        let commands = registry();
        let mut ctx = context();
        assert!(commands.execute("/warp start", &mut ctx));
        let actions = ctx.take_actions();
        assert!(actions.iter().any(|a| matches!(
            a,
            InjectAction::JoinRequest { world, invited: false } if world == "START"
        )));
    }

    #[test]
    fn skin_targets_local_net_id() {
        let commands = registry();
        let mut ctx = context();
        assert!(commands.execute("/skin 4278190335", &mut ctx));
        match &ctx.take_actions()[..] {
            [InjectAction::VariantToClient {
                function,
                options,
                ..
            }] => {
                assert_eq!(function, "OnChangeSkin");
                assert_eq!(options.net_id, 5);
            }
            other => panic!("unexpected actions {other:?}"),
        }
    }

    #[test]
    fn skin_without_spawn_is_contained() {
        let commands = registry();
        let mut ctx = context();
        ctx.local_net_id = -1;
        // The handler errors, which still counts as handled.
        assert!(commands.execute("/skin 1", &mut ctx));
        assert!(ctx.take_actions().is_empty());
    }

    #[test]
    fn help_lists_registered_names() {
        let commands = registry();
        let mut ctx = context();
        assert!(commands.execute("/help", &mut ctx));
        match &ctx.take_actions()[..] {
            [InjectAction::Log(line)] => {
                assert!(line.contains("/warp"));
                assert!(line.contains("/help"));
            }
            other => panic!("unexpected actions {other:?}"),
        }
    }
}
