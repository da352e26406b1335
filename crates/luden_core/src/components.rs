//! Built-in gameplay components and their reflection table

use crate::descriptor::TypeDescriptor;
use crate::error::RegistryError;
use crate::math::Vec2;
use crate::type_registry::TypeRegistry;
use crate::value::Reflect;

/// Damage dealt on contact
#[derive(Debug, Clone, PartialEq)]
pub struct CDamage {
    pub damage: i32,
}

impl Default for CDamage {
    fn default() -> Self {
        Self { damage: 1 }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CDraggable {
    pub dragging: bool,
}

/// Moves towards the player, returning home when it loses sight
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CFollowPlayer {
    pub home: Vec2,
    pub speed: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CGravity {
    pub gravity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CHealth {
    pub max: i32,
    pub current: i32,
}

impl Default for CHealth {
    fn default() -> Self {
        Self { max: 1, current: 1 }
    }
}

/// Input state sampled each frame
#[derive(Debug, Clone, PartialEq)]
pub struct CInput {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub attack: bool,
    pub can_attack: bool,
}

impl Default for CInput {
    fn default() -> Self {
        Self {
            up: false,
            down: false,
            left: false,
            right: false,
            attack: false,
            can_attack: true,
        }
    }
}

/// Axis-aligned collision box.
///
/// `half_size` always mirrors `size`; it is read-only through reflection and
/// follows writes to `size`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CBoundingBox {
    pub size: Vec2,
    pub half_size: Vec2,
    pub center: Vec2,
    pub prev_center: Vec2,
    pub block_move: bool,
    pub block_vision: bool,
}

impl CBoundingBox {
    pub fn new(center: Vec2, size: Vec2, block_move: bool, block_vision: bool) -> Self {
        Self {
            size,
            half_size: size.scaled(0.5),
            center,
            prev_center: center,
            block_move,
            block_vision,
        }
    }

    pub fn set_size(&mut self, size: Vec2) {
        self.size = size;
        self.half_size = size.scaled(0.5);
    }
}

/// Frames of invulnerability left
#[derive(Debug, Clone, PartialEq)]
pub struct CInvincibility {
    pub iframes: i32,
}

impl Default for CInvincibility {
    fn default() -> Self {
        Self { iframes: 1 }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CLifespan {
    pub lifespan: i32,
    pub frame_created: i32,
}

/// Cycles through a list of waypoints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CPatrol {
    pub positions: Vec<Vec2>,
    pub current_position: i32,
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CState {
    pub state: String,
    pub previous_state: String,
}

impl Default for CState {
    fn default() -> Self {
        Self {
            state: "stand".to_string(),
            previous_state: "stand".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CTransform {
    pub pos: Vec2,
    pub prev_pos: Vec2,
    pub velocity: Vec2,
    pub scale: Vec2,
    pub facing: Vec2,
    pub angle: f64,
}

impl Default for CTransform {
    fn default() -> Self {
        Self {
            pos: Vec2::ZERO,
            prev_pos: Vec2::ZERO,
            velocity: Vec2::ZERO,
            scale: Vec2::ONE,
            facing: Vec2::new(0.0, 1.0),
            angle: 0.0,
        }
    }
}

impl CTransform {
    pub fn at(pos: Vec2) -> Self {
        Self {
            pos,
            ..Self::default()
        }
    }

    pub fn new(pos: Vec2, velocity: Vec2, scale: Vec2, angle: f64) -> Self {
        Self {
            pos,
            prev_pos: pos,
            velocity,
            scale,
            angle,
            ..Self::default()
        }
    }
}

/// Descriptors of every built-in component, in registration order
pub fn builtin_descriptors() -> Vec<TypeDescriptor> {
    vec![
        TypeDescriptor::builder::<CDamage>("CDamage")
            .default_constructor()
            .constructor1(|damage: i32| CDamage { damage })
            .property("damage", |c| &c.damage, |c| &mut c.damage)
            .default_value(1)
            .build(),
        TypeDescriptor::builder::<CDraggable>("CDraggable")
            .default_constructor()
            .property("dragging", |c| &c.dragging, |c| &mut c.dragging)
            .default_value(false)
            .build(),
        TypeDescriptor::builder::<CFollowPlayer>("CFollowPlayer")
            .default_constructor()
            .constructor2(|home: Vec2, speed: f64| CFollowPlayer { home, speed })
            .property("home", |c| &c.home, |c| &mut c.home)
            .default_value(Vec2::ZERO)
            .property("speed", |c| &c.speed, |c| &mut c.speed)
            .default_value(0.0f64)
            .build(),
        TypeDescriptor::builder::<CGravity>("CGravity")
            .default_constructor()
            .constructor1(|gravity: f64| CGravity { gravity })
            .property("gravity", |c| &c.gravity, |c| &mut c.gravity)
            .default_value(0.0f64)
            .build(),
        TypeDescriptor::builder::<CHealth>("CHealth")
            .default_constructor()
            .constructor2(|max: i32, current: i32| CHealth { max, current })
            .property("max", |c| &c.max, |c| &mut c.max)
            .default_value(1)
            .property("current", |c| &c.current, |c| &mut c.current)
            .default_value(1)
            .build(),
        TypeDescriptor::builder::<CInput>("CInput")
            .default_constructor()
            .property("up", |c| &c.up, |c| &mut c.up)
            .default_value(false)
            .property("down", |c| &c.down, |c| &mut c.down)
            .default_value(false)
            .property("left", |c| &c.left, |c| &mut c.left)
            .default_value(false)
            .property("right", |c| &c.right, |c| &mut c.right)
            .default_value(false)
            .property("attack", |c| &c.attack, |c| &mut c.attack)
            .default_value(false)
            .property("canAttack", |c| &c.can_attack, |c| &mut c.can_attack)
            .default_value(true)
            .build(),
        TypeDescriptor::builder::<CBoundingBox>("CBoundingBox")
            .default_constructor()
            .constructor4(CBoundingBox::new)
            .property_with("size", |c| c.size.to_value(), CBoundingBox::set_size)
            .read_only_property("halfSize", |c| &c.half_size)
            .property("center", |c| &c.center, |c| &mut c.center)
            .property("prevCenter", |c| &c.prev_center, |c| &mut c.prev_center)
            .property("blockMove", |c| &c.block_move, |c| &mut c.block_move)
            .default_value(false)
            .property("blockVision", |c| &c.block_vision, |c| &mut c.block_vision)
            .default_value(false)
            .build(),
        TypeDescriptor::builder::<CInvincibility>("CInvincibility")
            .default_constructor()
            .constructor1(|iframes: i32| CInvincibility { iframes })
            .property("iframes", |c| &c.iframes, |c| &mut c.iframes)
            .default_value(1)
            .build(),
        TypeDescriptor::builder::<CLifespan>("CLifespan")
            .default_constructor()
            .constructor2(|lifespan: i32, frame_created: i32| CLifespan {
                lifespan,
                frame_created,
            })
            .property("lifespan", |c| &c.lifespan, |c| &mut c.lifespan)
            .default_value(0)
            .property("frameCreated", |c| &c.frame_created, |c| &mut c.frame_created)
            .default_value(0)
            .build(),
        TypeDescriptor::builder::<CPatrol>("CPatrol")
            .default_constructor()
            .constructor2(|positions: Vec<Vec2>, speed: f64| CPatrol {
                positions,
                current_position: 0,
                speed,
            })
            .property("positions", |c| &c.positions, |c| &mut c.positions)
            .property(
                "currentPosition",
                |c| &c.current_position,
                |c| &mut c.current_position,
            )
            .default_value(0)
            .property("speed", |c| &c.speed, |c| &mut c.speed)
            .default_value(0.0f64)
            .build(),
        TypeDescriptor::builder::<CState>("CState")
            .default_constructor()
            .constructor1(|state: String| CState {
                state,
                ..CState::default()
            })
            .property("state", |c| &c.state, |c| &mut c.state)
            .default_value("stand")
            .property("previousState", |c| &c.previous_state, |c| &mut c.previous_state)
            .default_value("stand")
            .build(),
        TypeDescriptor::builder::<CTransform>("CTransform")
            .default_constructor()
            .constructor1(CTransform::at)
            .constructor4(CTransform::new)
            .property("pos", |c| &c.pos, |c| &mut c.pos)
            .default_value(Vec2::ZERO)
            .property("prevPos", |c| &c.prev_pos, |c| &mut c.prev_pos)
            .default_value(Vec2::ZERO)
            .property("velocity", |c| &c.velocity, |c| &mut c.velocity)
            .default_value(Vec2::ZERO)
            .property("scale", |c| &c.scale, |c| &mut c.scale)
            .default_value(Vec2::ONE)
            .property("facing", |c| &c.facing, |c| &mut c.facing)
            .default_value(Vec2::new(0.0, 1.0))
            .property("angle", |c| &c.angle, |c| &mut c.angle)
            .default_value(0.0f64)
            .build(),
    ]
}

/// Register every built-in component
pub fn register_builtin_components(registry: &mut TypeRegistry) -> Result<(), RegistryError> {
    for descriptor in builtin_descriptors() {
        registry.register(descriptor)?;
    }
    log::info!("Registered {} built-in component types", registry.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_builtins_register() {
        let mut registry = TypeRegistry::new();
        register_builtin_components(&mut registry).unwrap();

        assert_eq!(registry.len(), 12);
        assert_eq!(registry.name_of::<CTransform>(), Some("CTransform"));
        // Registering twice is idempotent
        register_builtin_components(&mut registry).unwrap();
        assert_eq!(registry.len(), 12);
    }

    #[test]
    fn test_defaults_match_rust_defaults() {
        let mut registry = TypeRegistry::new();
        register_builtin_components(&mut registry).unwrap();

        for descriptor in registry.iter() {
            let instance = registry.construct(descriptor.name(), &[]).unwrap();
            for property in descriptor.properties() {
                if let Some(default) = property.default_value() {
                    let actual = registry.get_property(&instance, property.name()).unwrap();
                    let expected = match (property.value_type(), default) {
                        (crate::value::ValueType::Float, Value::Int(v)) => Value::Float(*v as f64),
                        _ => default.clone(),
                    };
                    assert_eq!(actual, expected, "{}.{}", descriptor.name(), property.name());
                }
            }
        }
    }

    #[test]
    fn test_bounding_box_size_updates_half_size() {
        let mut registry = TypeRegistry::new();
        register_builtin_components(&mut registry).unwrap();

        let mut bbox = registry.construct("CBoundingBox", &[]).unwrap();
        registry
            .set_property(&mut bbox, "size", Value::Vec2(Vec2::new(4.0, 2.0)))
            .unwrap();

        assert_eq!(
            registry.get_property(&bbox, "halfSize").unwrap(),
            Value::Vec2(Vec2::new(2.0, 1.0))
        );
    }

    #[test]
    fn test_transform_overloads() {
        let mut registry = TypeRegistry::new();
        register_builtin_components(&mut registry).unwrap();

        let at = registry
            .construct("CTransform", &[Value::Vec2(Vec2::new(3.0, 4.0))])
            .unwrap();
        let at = at.downcast_ref::<CTransform>().unwrap();
        assert_eq!(at.pos, Vec2::new(3.0, 4.0));
        assert_eq!(at.prev_pos, Vec2::ZERO);

        let full = registry
            .construct(
                "CTransform",
                &[
                    Value::Vec2(Vec2::new(1.0, 1.0)),
                    Value::Vec2(Vec2::new(2.0, 0.0)),
                    Value::Vec2(Vec2::ONE),
                    Value::Int(90),
                ],
            )
            .unwrap();
        let full = full.downcast_ref::<CTransform>().unwrap();
        assert_eq!(full.prev_pos, full.pos);
        assert_eq!(full.angle, 90.0);
    }
}
