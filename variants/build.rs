const VARIANTS: [&str; 4] = ["hce", "nnue", "fairy", "sf16"];

fn main() {
    println!("cargo:rerun-if-env-changed=MULTIENGINE_LIB_DIR");

    let linked: Vec<&str> = VARIANTS
        .into_iter()
        .filter(|v| std::env::var_os(format!("CARGO_FEATURE_{}", v.to_uppercase())).is_some())
        .collect();
    if linked.is_empty() {
        return;
    }

    if let Ok(dir) = std::env::var("MULTIENGINE_LIB_DIR") {
        println!("cargo:rustc-link-search=native={dir}");
    }
    for variant in linked {
        println!("cargo:rustc-link-lib=static=multiengine_{variant}");
    }
    // The engines are C++.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
        println!("cargo:rustc-link-lib=dylib=c++");
    } else {
        println!("cargo:rustc-link-lib=dylib=stdc++");
    }
}
