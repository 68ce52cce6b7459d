use sharedbus::prelude::*;

mod fixture {
    sharedbus::prelude::bus_constants!("tests/fixtures/manifest.json");
}

#[test]
fn test_constants_match_manifest() {
    let manifest = read_manifest_file("tests/fixtures/manifest.json").unwrap();
    assert_eq!(fixture::MANIFEST_MD5, manifest.md5_string());
    assert_eq!(fixture::ADC0_ARM, 0x2108);
    assert_eq!(fixture::DAC0_PI_MASTER_SELECT, 0x2200);
    assert_eq!(fixture::CL_PARAMS_ZPOS, 0x7014);
    assert_eq!(
        fixture::CL_PARAMS_CL_I,
        manifest.register("cl_params", "cl_I").unwrap().0
    );
}

#[test]
fn test_board_agrees_with_fixture() {
    let board = Board::new(Default::default()).unwrap();
    for (region, register, addr) in [
        ("adc0", "from_slave", fixture::ADC0_FROM_SLAVE),
        ("dac0_pi", "master_select", fixture::DAC0_PI_MASTER_SELECT),
        ("cl_params", "setpt", fixture::CL_PARAMS_SETPT),
    ] {
        assert_eq!(board.manifest().register(region, register).unwrap().0, addr);
    }
}
