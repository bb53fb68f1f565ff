use game_engine_bindings::abi;
use game_engine_bindings::classes::{
    Animation, AnimationLibrary, ClassDB, EngineDebugger, EngineProfiler, Node, Node2D, Object,
};
use game_engine_bindings::handle::{self, ManagedHandle, Ownership};
use game_engine_bindings::mock::{self, MockEngine};
use game_engine_bindings::values::EngineVariant;
use game_engine_bindings::{
    Array, BindingError, BindingResult, ClassBuilder, Dictionary, EngineClass, GString, HostInstance,
    Inherits, StringName, Variant, VariantType,
};
use glam::Vec2;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

#[test]
fn test_singleton_resolved_once() -> anyhow::Result<()> {
    let engine = MockEngine::install();

    let first = ClassDB::singleton()?;
    let second = ClassDB::singleton()?;

    assert_eq!(first.handle()?, second.handle()?);
    assert_eq!(engine.singleton_lookups(), 1);
    Ok(())
}

#[test]
fn test_animation_library_round_trip() -> anyhow::Result<()> {
    let _engine = MockEngine::install();

    let library = AnimationLibrary::new()?;
    assert!(!library.has_animation("walk")?);

    let walk = Animation::new()?;
    walk.set_length(1.5)?;
    library.add_animation("walk", &walk)?;
    assert!(library.has_animation("walk")?);

    let fetched = library.get_animation("walk")?.expect("walk was just added");
    assert_eq!(fetched.handle()?, walk.handle()?);
    assert_eq!(fetched.managed().ownership(), Ownership::Shared);
    assert_eq!(fetched.get_length()?, 1.5);

    // 重名
    let err = library.add_animation("walk", &Animation::new()?).unwrap_err();
    assert!(matches!(err, BindingError::Engine(_)), "{:?}", err);

    library.remove_animation("walk")?;
    assert!(!library.has_animation("walk")?);
    assert!(library.get_animation("walk")?.is_none());
    Ok(())
}

#[test]
fn test_animation_list_contents() -> anyhow::Result<()> {
    let _engine = MockEngine::install();

    let library = AnimationLibrary::new()?;
    for name in ["walk", "run", "idle"] {
        library.add_animation(name, &Animation::new()?)?;
    }

    let list = library.get_animation_list()?;
    assert_eq!(list.len()?, 3);
    assert_eq!(list.element_type()?, Some(VariantType::StringName));

    let mut names = list
        .iter()?
        .map(|item| match item? {
            Variant::StringName(name) => name.to_utf8(),
            other => Ok(format!("{:?}", other)),
        })
        .collect::<Result<Vec<_>, _>>()?;
    names.sort();
    assert_eq!(names, ["idle", "run", "walk"]);
    Ok(())
}

#[test]
fn test_animation_added_signal() -> anyhow::Result<()> {
    let engine = MockEngine::install();

    let library = AnimationLibrary::new()?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callable = library.on_animation_added(move |name| {
        sink.lock().unwrap().push(name.to_string());
    })?;

    library.add_animation("jump", &Animation::new()?)?;
    assert_eq!(*seen.lock().unwrap(), ["jump"]);
    assert_eq!(engine.connection_count(library.handle()?, "animation_added"), 1);

    let object: Object = library.view()?;
    assert!(object.is_connected("animation_added", &callable)?);
    object.disconnect("animation_added", &callable)?;
    library.add_animation("fall", &Animation::new()?)?;
    assert_eq!(seen.lock().unwrap().len(), 1);
    Ok(())
}

struct HostProfiler {
    toggles: Arc<AtomicUsize>,
    enabled: bool,
}

impl HostInstance for HostProfiler {}

#[test]
fn test_host_profiler_toggle() -> anyhow::Result<()> {
    let toggles = Arc::new(AtomicUsize::new(0));
    let last_state = Arc::new(Mutex::new(None));

    let counter = toggles.clone();
    let state = last_state.clone();
    let _engine = MockEngine::install_with(move || {
        let counter = counter.clone();
        let state = state.clone();
        ClassBuilder::<HostProfiler>::new("HostProfiler", "EngineProfiler")
            .factory(move |_object| HostProfiler {
                toggles: counter.clone(),
                enabled: false,
            })
            .virtual_method("_toggle", move |this: &mut HostProfiler, args| {
                this.enabled = args[0].try_to()?;
                this.toggles.fetch_add(1, Ordering::SeqCst);
                *state.lock().unwrap() = Some(this.enabled);
                Ok(Variant::Nil)
            })
            .register()
    });

    let debugger = EngineDebugger::singleton()?;
    let profiler = EngineProfiler::new_extension("HostProfiler")?;
    debugger.register_profiler("host", &profiler)?;
    assert!(debugger.has_profiler("host")?);

    debugger.profiler_enable("host", true, &Array::new())?;
    assert_eq!(*last_state.lock().unwrap(), Some(true));
    assert!(debugger.is_profiling("host")?);

    debugger.profiler_enable("host", false, &Array::new())?;
    assert_eq!(*last_state.lock().unwrap(), Some(false));
    assert_eq!(toggles.load(Ordering::SeqCst), 2);

    debugger.unregister_profiler("host")?;
    assert!(!debugger.has_profiler("host")?);
    Ok(())
}

#[test]
fn test_instantiate_managed_lifecycle() -> anyhow::Result<()> {
    let engine = MockEngine::install();

    let db = ClassDB::singleton()?;
    let node = db.instantiate_managed("Node")?;
    assert_eq!(node.ownership(), Ownership::Host);
    assert!(engine.is_alive(node.raw()));

    let before = engine.destroy_count();
    node.end()?;
    assert_eq!(engine.destroy_count(), before + 1);
    assert!(!engine.is_alive(node.raw()));

    let err = node.get().unwrap_err();
    assert!(matches!(err, BindingError::UseAfterFree(_)), "{:?}", err);

    // 第二次 end 是无操作
    node.end()?;
    assert_eq!(engine.destroy_count(), before + 1);
    Ok(())
}

#[test]
fn test_class_db_queries() -> anyhow::Result<()> {
    let _engine = MockEngine::install();

    let db = ClassDB::singleton()?;
    assert!(db.class_exists("Node2D")?);
    assert!(!db.class_exists("NoSuchClass")?);
    assert_eq!(db.get_parent_class("Node2D")?.to_utf8()?, "CanvasItem");
    assert!(db.is_parent_class("Node2D", "Node")?);
    assert!(!db.is_parent_class("Node", "Node2D")?);
    assert!(db.instantiate("NoSuchClass")?.is_nil());
    Ok(())
}

#[test]
fn test_cast_up_and_down() -> anyhow::Result<()> {
    let engine = MockEngine::install();

    let node_2d = ClassDB::singleton()?
        .instantiate_managed("Node2D")
        .map(Node2D::from_managed)?;
    let address = node_2d.handle()?;

    let node: Node = node_2d.as_parent().map_err(|_| anyhow::anyhow!("Node2D is a Node"))?;
    assert_eq!(node.handle()?, address);

    let back: Node2D = node.as_child().map_err(|_| anyhow::anyhow!("object is a Node2D"))?;
    assert_eq!(back.handle()?, address);

    // 无关的类原样交还
    let node: Node = back.upcast();
    let node = match node.as_child::<Animation>() {
        Ok(_) => anyhow::bail!("Node2D cast to Animation"),
        Err(node) => node,
    };
    assert!(matches!(node.cast::<Animation>(), Err(BindingError::TypeMismatch { .. })));
    assert!(engine.is_alive(address));
    Ok(())
}

#[test]
fn test_shared_handles_balance() -> anyhow::Result<()> {
    let engine = MockEngine::install();

    let animation = Animation::new()?;
    let address = animation.handle()?;
    assert_eq!(animation.managed().ownership(), Ownership::Shared);
    assert_eq!(engine.reference_count(address), Some(1));

    let extra = animation.managed().share()?;
    assert_eq!(engine.reference_count(address), Some(2));
    assert_eq!(handle::live_count(address), 2);

    extra.end()?;
    assert_eq!(engine.reference_count(address), Some(1));
    assert_eq!(handle::live_count(address), 1);

    let before = engine.destroy_count();
    drop(animation);
    assert_eq!(handle::live_count(address), 0);
    assert_eq!(engine.reference_count(address), None);
    assert_eq!(engine.destroy_count(), before + 1);
    Ok(())
}

#[test]
fn test_missing_symbol_is_configuration_error() {
    let _lock = mock::test_lock();
    game_engine_bindings::entry::reset();
    mock::hide_symbol("callable_custom_get_userdata");

    let result = unsafe { abi::init(mock::lookup_fn(), std::ptr::null_mut()) };
    mock::reveal_symbols();

    match result {
        Err(BindingError::Configuration(message)) => {
            assert!(message.contains("callable_custom_get_userdata"), "{}", message)
        }
        other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
    }
    assert!(!abi::is_initialized());
}

#[test]
fn test_node2d_position() -> anyhow::Result<()> {
    let _engine = MockEngine::install();

    let node = ClassDB::singleton()?
        .instantiate_managed("Node2D")
        .map(Node2D::from_managed)?;
    assert_eq!(node.get_position()?, Vec2::ZERO);

    node.set_position(Vec2::new(3.5, -2.0))?;
    assert_eq!(node.get_position()?, Vec2::new(3.5, -2.0));

    let as_node: Node = node.view()?;
    as_node.set_name(StringName::from("Player"))?;
    assert_eq!(as_node.get_name()?.to_utf8()?, "Player");

    node.managed().end()?;
    Ok(())
}

#[test]
fn test_engine_backed_containers() -> anyhow::Result<()> {
    let _engine = MockEngine::install();

    let mut array = Array::typed_engine(VariantType::Int)?;
    for i in 0..4_i64 {
        array.push(i * 10)?;
    }
    assert_eq!(array.len()?, 4);
    assert_eq!(array.iter()?.count(), 4);
    assert_eq!(array.get(2)?, Variant::Int(20));
    assert!(array.push("text").is_err());

    // 复制后互不影响
    let copy = array.clone();
    array.remove(0)?;
    assert_eq!(array.len()?, 3);
    assert_eq!(copy.len()?, 4);

    let mut dict = Dictionary::new_engine()?;
    dict.set("speed", 4.5)?;
    dict.set(7_i64, "seven")?;
    assert!(dict.has("speed")?);
    assert_eq!(dict.get("speed")?, Some(Variant::Float(4.5)));
    assert_eq!(dict.len()?, dict.iter()?.count());
    assert_eq!(dict.remove(7_i64)?.map(|v| v.try_to::<String>()).transpose()?, Some("seven".to_string()));
    assert!(!dict.has(7_i64)?);
    Ok(())
}

#[test]
fn test_zero_argument_calls() -> anyhow::Result<()> {
    let _engine = MockEngine::install();

    // 无参 ptrcall
    let animation = Animation::new()?;
    assert_eq!(animation.get_length()?, 0.0);
    let node = ClassDB::singleton()?
        .instantiate_managed("Node2D")
        .map(Node2D::from_managed)?;
    assert_eq!(node.get_position()?, Vec2::ZERO);
    let library = AnimationLibrary::new()?;
    assert_eq!(library.get_animation_list()?.len()?, 0);

    // 无参内建方法
    let array = Array::typed_engine(VariantType::Int)?;
    assert!(array.is_empty()?);
    assert_eq!(array.iter()?.count(), 0);
    let dict = Dictionary::new_engine()?;
    assert_eq!(dict.len()?, 0);

    node.managed().end()?;
    Ok(())
}

#[test]
fn test_engine_variant_round_trip() -> anyhow::Result<()> {
    let _engine = MockEngine::install();

    for &ty in VariantType::ALL {
        let value = Variant::default_for(ty);
        let engine = EngineVariant::from_host(&value)?;
        assert_eq!(engine.variant_type()?, ty);
        let back = engine.to_host()?;
        assert_eq!(back.variant_type(), ty);
        // 空 Callable 与空 Signal 没有可比较的身份
        if !matches!(ty, VariantType::Callable | VariantType::Signal) {
            assert_eq!(back, value, "{}", ty);
        }
    }

    let samples = [
        Variant::Bool(true),
        Variant::Int(-42),
        Variant::Float(2.5),
        Variant::String(GString::from("player_name")),
        Variant::StringName(StringName::from("walk")),
        (1..=3_i64).map(Variant::from).collect::<Array>().into(),
    ];
    for value in &samples {
        let engine = EngineVariant::from_host(value)?;
        assert_eq!(engine.variant_type()?, value.variant_type());
        assert_eq!(&engine.to_host()?, value);
        assert_eq!(&engine.try_clone()?.to_host()?, value);
    }
    Ok(())
}

#[test]
fn test_vector2_engine_round_trip() -> anyhow::Result<()> {
    let _engine = MockEngine::install();

    let position = Vec2::new(-7.25, 1024.5);
    let engine = EngineVariant::from_host(&Variant::from(position))?;
    assert_eq!(engine.variant_type()?, VariantType::Vector2);
    let back: Vec2 = engine.to_host()?.try_to()?;
    assert_eq!(back.x.to_bits(), position.x.to_bits());
    assert_eq!(back.y.to_bits(), position.y.to_bits());

    let mut array = Array::typed_engine(VariantType::Vector2)?;
    array.push(position)?;
    assert_eq!(array.get(0)?, Variant::from(position));
    Ok(())
}

#[test]
fn test_registration_after_main_loop_is_frozen() {
    let engine = MockEngine::install();
    engine.start_main_loop();

    // 未知的虚方法名也先报告冻结
    let err = ClassBuilder::<HostProfiler>::new("LateProfiler", "EngineProfiler")
        .factory(|_| HostProfiler {
            toggles: Arc::new(AtomicUsize::new(0)),
            enabled: false,
        })
        .virtual_method("_no_such_virtual", |_: &mut HostProfiler, _| Ok(Variant::Nil))
        .register()
        .unwrap_err();
    assert!(matches!(err, BindingError::RegistryFrozen(ref name) if name == "LateProfiler"), "{:?}", err);
    assert!(game_engine_bindings::registry::get("LateProfiler").is_none());
}

#[test]
fn test_singleton_single_lookup_across_threads() -> anyhow::Result<()> {
    let engine = MockEngine::install();

    let barrier = Arc::new(Barrier::new(8));
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let barrier = barrier.clone();
            std::thread::spawn(move || -> BindingResult<usize> {
                barrier.wait();
                Ok(ClassDB::singleton()?.handle()?.addr())
            })
        })
        .collect();
    let mut addresses = Vec::new();
    for worker in workers {
        let address = worker.join().map_err(|_| anyhow::anyhow!("worker panicked"))??;
        addresses.push(address);
    }

    addresses.dedup();
    assert_eq!(addresses.len(), 1);
    assert_eq!(engine.singleton_lookups(), 1);
    Ok(())
}

type HandleCell = Arc<Mutex<Option<Arc<ManagedHandle>>>>;
type OutcomeCell = Arc<Mutex<Option<BindingResult<()>>>>;

/// 释放时结束自己所在对象的句柄
struct SelfReleasing {
    handle: HandleCell,
    outcome: OutcomeCell,
}

impl HostInstance for SelfReleasing {}

impl Drop for SelfReleasing {
    fn drop(&mut self) {
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            *self.outcome.lock().unwrap() = Some(handle.end());
        }
    }
}

#[test]
fn test_end_reentered_from_teardown() -> anyhow::Result<()> {
    let handle_cell: HandleCell = Arc::new(Mutex::new(None));
    let outcome: OutcomeCell = Arc::new(Mutex::new(None));

    let (cell, sink) = (handle_cell.clone(), outcome.clone());
    let engine = MockEngine::install_with(move || {
        let (cell, sink) = (cell.clone(), sink.clone());
        ClassBuilder::<SelfReleasing>::new("SelfReleasing", "Node")
            .factory(move |_| SelfReleasing {
                handle: cell.clone(),
                outcome: sink.clone(),
            })
            .register()
    });

    let node = Arc::new(ClassDB::singleton()?.instantiate_managed("SelfReleasing")?);
    assert_eq!(node.ownership(), Ownership::Host);
    let address = node.raw();
    *handle_cell.lock().unwrap() = Some(node.clone());

    let before = engine.destroy_count();
    node.end()?;
    assert_eq!(engine.destroy_count(), before + 1);
    assert!(!engine.is_alive(address));
    let expected = if game_engine_bindings::config::runtime::cycle_guard_enabled() {
        Err(BindingError::RecursiveRelease(address.addr()))
    } else {
        Ok(())
    };
    assert_eq!(outcome.lock().unwrap().take(), Some(expected));
    Ok(())
}
