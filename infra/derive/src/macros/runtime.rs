use proc_macro2::TokenStream;
use quote::quote;
use syn::{Error, Ident, ItemFn, ReturnType, Type};

/// Expands `#[tether_runtime::main]`.
#[must_use]
pub fn expand_main(args: TokenStream, input: ItemFn) -> TokenStream {
    if input.sig.asyncness.is_none() {
        return Error::new_spanned(
            input.sig.fn_token,
            "#[tether_runtime::main] can only be used on async functions",
        )
        .to_compile_error();
    }

    if !returns_result(&input.sig.output) {
        return Error::new_spanned(
            &input.sig.output,
            "#[tether_runtime::main] requires a Result return type",
        )
        .to_compile_error();
    }

    let preset = match preset_call(args) {
        Ok(preset) => preset,
        Err(err) => return err.to_compile_error(),
    };

    let ItemFn { attrs, vis, sig, block } = input;
    let name = &sig.ident;
    let output = &sig.output;

    quote! {
        #(#attrs)*
        #vis fn #name() #output {
            let config = #preset;
            let runtime = ::tether_runtime::build_runtime_with_config(&config)?;
            runtime.block_on(async #block)
        }
    }
}

fn preset_call(args: TokenStream) -> Result<TokenStream, Error> {
    if args.is_empty() {
        return Ok(quote! { ::tether_runtime::RuntimeConfig::default() });
    }

    let preset: Ident = syn::parse2(args)?;
    match preset.to_string().as_str() {
        "proxy" => Ok(quote! { ::tether_runtime::RuntimeConfig::proxy() }),
        "tooling" => Ok(quote! { ::tether_runtime::RuntimeConfig::tooling() }),
        "default" => Ok(quote! { ::tether_runtime::RuntimeConfig::default() }),
        _ => Err(Error::new_spanned(preset, "Unknown runtime preset. Use: proxy, tooling, or default")),
    }
}

fn returns_result(output: &ReturnType) -> bool {
    let ReturnType::Type(_, ty) = output else {
        return false;
    };
    let Type::Path(path) = &**ty else {
        return false;
    };
    path.path.segments.last().is_some_and(|seg| seg.ident == "Result")
}
