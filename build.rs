// Build script to compile the triangle's GLSL shaders to SPIR-V
//
// The renderer loads ./shader/vert.spv and ./shader/frag.spv at runtime, so the
// outputs are written next to the sources instead of into OUT_DIR.

use std::path::Path;
use std::process::Command;

fn main() {
    // Whole directory, so a deleted .spv is regenerated as well
    println!("cargo:rerun-if-changed=shader/");

    compile_shader("shader/triangle.vert", "shader/vert.spv");
    compile_shader("shader/triangle.frag", "shader/frag.spv");
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    if !input_path.exists() {
        println!("cargo:warning=Shader source {} not found, skipping", input);
        return;
    }

    // glslc ships with the Vulkan SDK
    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), {} was not compiled", e, input);
            println!("cargo:warning=Compile manually: glslc {} -o {}", input, output);
        }
    }
}
