//! Runtime / interpreter / thread-state lifecycle end-to-end scenarios.
//!
//! Exercises §8 scenario 1 (attach-detach-attach across two threads) and
//! scenario 5 (subinterpreter module-registry isolation) from the
//! perspective of an embedder using only the public API.

use runtime_core::interp::Config;
use runtime_core::runtime::Runtime;
use runtime_core::thread::ThreadState;

#[test]
fn attach_detach_attach_across_two_threads() {
    let rt = Runtime::new_for_test();
    let interp = rt.main_interpreter();

    let a = ThreadState::new(interp.clone());
    a.bind();
    a.attach().unwrap();
    a.dict_insert("x", serde_json::json!(1));
    a.detach();

    let b = ThreadState::new(interp.clone());
    b.bind();
    b.attach().unwrap();
    // The interpreter dict is shared; the per-thread dict is not, so "x"
    // written to thread A's own dict is absent here.
    assert!(interp.get_dict().get("x").is_none());
    assert!(b.get_dict().get("x").is_none());
    b.detach();

    a.attach().unwrap();
    assert_eq!(a.get_dict().get("x"), Some(&serde_json::json!(1)));
    a.detach();
}

#[test]
fn subinterpreter_module_registry_is_isolated() {
    let rt = Runtime::new_for_test();
    let main = rt.main_interpreter();
    let sub = rt.create_interpreter(Config::default());

    sub.module_insert("m", serde_json::json!({"k": 42}));
    assert!(sub.module_get("m").is_some());
    assert!(main.module_get("m").is_none());

    // Independent GELs: the main interpreter can still attach while a
    // subinterpreter's GEL is held elsewhere.
    let sub_ts = ThreadState::new(sub.clone());
    sub_ts.bind();
    sub_ts.attach().unwrap();

    let main_ts = ThreadState::new(main.clone());
    main_ts.bind();
    main_ts.attach().unwrap();
    assert!(main_ts.is_attached());

    main_ts.detach();
    sub_ts.detach();
}

#[test]
fn only_one_thread_state_attached_per_interpreter() {
    let rt = Runtime::new_for_test();
    let interp = rt.main_interpreter();
    let a = ThreadState::new(interp.clone());
    a.bind();
    a.attach().unwrap();

    let interp_for_b = interp.clone();
    let handle = std::thread::spawn(move || {
        let b = ThreadState::new(interp_for_b);
        b.bind();
        b.attach().unwrap();
        assert!(b.is_attached());
        b.detach();
    });

    std::thread::sleep(std::time::Duration::from_millis(20));
    a.detach();
    handle.join().unwrap();
}

#[test]
fn running_main_marker_is_exclusive_across_threads() {
    let rt = Runtime::new_for_test();
    let interp = rt.main_interpreter();
    let a = ThreadState::new(interp.clone());
    let b = ThreadState::new(interp.clone());
    a.set_running_main();
    assert!(interp.is_running_main(a.id));
    assert!(interp.fail_if_running_main().is_err());
    a.unset_running_main();
    assert!(interp.fail_if_running_main().is_ok());

    b.set_running_main();
    assert!(interp.is_running_main(b.id));
}
