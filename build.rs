fn main() {
    let profile = std::env::var("PROFILE").unwrap_or_default();
    let test_key_enabled = std::env::var_os("CARGO_FEATURE_TEST_KEY_SUBSTITUTION").is_some();
    let allow_release = std::env::var("SN_TESTKEY_ALLOW_RELEASE").unwrap_or_default() == "1";

    // 测试公钥缓冲区绝不能出现在发布版镜像中
    if test_key_enabled && profile == "release" && !allow_release {
        panic!(
            "\n\n\
            ╔════════════════════════════════════════════════════════════════════════╗\n\
            ║  错误：release 构建启用了 test-key-substitution                        ║\n\
            ╠════════════════════════════════════════════════════════════════════════╣\n\
            ║                                                                        ║\n\
            ║  测试公钥缓冲区只允许出现在测试构建中。被盖章的缓冲区会让              ║\n\
            ║  测试密钥签名的程序集获得平台信任。                                    ║\n\
            ║                                                                        ║\n\
            ║  当前构建：                                                            ║\n\
            ║    profile： {:<57} ║\n\
            ║                                                                        ║\n\
            ║  如果确实需要带缓冲区的优化构建（例如性能测试镜像），                  ║\n\
            ║  请设置环境变量 SN_TESTKEY_ALLOW_RELEASE=1。                           ║\n\
            ║                                                                        ║\n\
            ╚════════════════════════════════════════════════════════════════════════╝\n\
            ",
            profile
        );
    }

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=SN_TESTKEY_ALLOW_RELEASE");
}
