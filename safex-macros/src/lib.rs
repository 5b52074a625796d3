extern crate proc_macro;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{quote, ToTokens};
use syn::{parse::Parse, parse::ParseStream, parse_macro_input, Expr, Ident, ItemFn, Token, Type};

/// A simple parser for our attribute arguments
struct AttributeArgs {
    handler: Option<Expr>,
    error: Option<Type>,
}

impl Parse for AttributeArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut args = AttributeArgs {
            handler: None,
            error: None,
        };

        while !input.is_empty() {
            let key: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            match key.to_string().as_str() {
                "handler" if args.handler.is_none() => args.handler = Some(input.parse()?),
                "error" if args.error.is_none() => args.error = Some(input.parse()?),
                "handler" | "error" => {
                    return Err(syn::Error::new(key.span(), format!("duplicate `{}` argument", key)));
                }
                _ => {
                    return Err(syn::Error::new(
                        key.span(),
                        "unknown argument, expected `handler` or `error`",
                    ));
                }
            }

            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(args)
    }
}

impl AttributeArgs {
    /// The handler expression and the error type it produces
    fn resolve(self) -> syn::Result<(TokenStream2, TokenStream2)> {
        match (self.handler, self.error) {
            (None, None) => Ok((quote!(::safex::NoHandler), quote!(()))),
            (None, Some(error)) => Err(syn::Error::new_spanned(
                error,
                "`error` names the output of a `handler`, which is missing",
            )),
            (Some(handler), Some(error)) => Ok((handler.into_token_stream(), error.into_token_stream())),
            // Without an explicit error type the handler must be a type we can instantiate
            (Some(handler), None) => {
                let handler_type: Type = syn::parse2(handler.to_token_stream()).map_err(|_| {
                    syn::Error::new_spanned(
                        &handler,
                        "a handler expression needs `error = Type`; only a handler type can infer it",
                    )
                })?;
                Ok((
                    quote!(<#handler_type as ::core::default::Default>::default()),
                    quote!(<#handler_type as ::safex::ErrorHandler>::Error),
                ))
            }
        }
    }
}

fn expand(args: AttributeArgs, input_fn: ItemFn) -> syn::Result<TokenStream2> {
    let (handler, error_type) = args.resolve()?;

    // Extract return type from function signature
    let return_type = match &input_fn.sig.output {
        syn::ReturnType::Type(_, ty) => ty.clone(),
        syn::ReturnType::Default => {
            return Err(syn::Error::new_spanned(
                &input_fn.sig,
                "Function must have an explicit return type",
            ));
        }
    };

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = input_fn;

    sig.output = syn::parse_quote! {
        -> <#return_type as ::safex::Safeguard<#error_type>>::Output
    };

    let body = if sig.asyncness.is_some() {
        quote! {
            ::safex::safe_return(
                move || async move {
                    let __safex_output: #return_type = #block;
                    __safex_output
                },
                #handler,
            )
            .await
        }
    } else {
        quote! {
            ::safex::Fault::merge(::safex::from_unsafe(move || -> #return_type #block, #handler))
        }
    };

    Ok(quote! {
        #(#attrs)*
        #vis #sig {
            #body
        }
    })
}

/// #[safe] - Turn a function returning `Result` into its panic-catching form
///
/// The function keeps its name, visibility, generics and parameter list. Its
/// return type `Result<T, E>` becomes `Result<T, safex::Fault<E, C>>`: an
/// `Err` the body returns is passed through as `Fault::Returned`, and a panic
/// in the body becomes `Fault::Caught` with the handler's output `C`.
///
/// Example:
/// ```rust,ignore
/// #[safe]
/// fn parse(input: &str) -> Result<u8, std::num::ParseIntError> {
///     input.parse()
/// }
///
/// #[safe(handler = PanicMessage)]
/// async fn fetch(id: u32) -> Result<String, String> {
///     // function logic here
///     Ok(format!("user-{id}"))
/// }
///
/// #[safe(handler = |_: safex::Panic| "FAILED", error = &'static str)]
/// fn first(items: &[u8]) -> Result<u8, ()> {
///     Ok(items[0])
/// }
/// ```
///
/// Arguments:
/// - none: a caught panic becomes `()`
/// - `handler = Type`: `Type: ErrorHandler + Default`, instantiated per call;
///   generic handler types are written with a turbofish, `Logged::<PanicMessage>`
/// - `handler = expr, error = Type`: any handler expression with its output type
#[proc_macro_attribute]
pub fn safe(args: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args as AttributeArgs);
    let input_fn = parse_macro_input!(item as ItemFn);

    expand(args, input_fn)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
